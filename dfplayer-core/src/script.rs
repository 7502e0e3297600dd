//! Command scripts: one player instruction per line.
//!
//! ```text
//! # comment, echoed to the log
//! rst
//! vol 15
//! trl 3, 1, 2
//! zzz 1000
//! stp
//! ```
//!
//! Tokens are separated by spaces or commas. Blank lines are skipped.
//!
//! | verb | argument | action |
//! |------|----------|--------|
//! | `trk` | track | play now |
//! | `trl` | tracks (≤ 16) | play each after the previous ends |
//! | `nxt` / `prv` | | next / previous track after the current ends |
//! | `rst` | | reset the module |
//! | `vol` | `0..=30` | device volume, mapped onto the user scale |
//! | `stp` | | stop |
//! | `zzz` | ms | wait for the current track to end, then sleep |

use dfplayer_proto::VOLUME_MAX;
use embassy_sync::blocking_mutex::raw::RawMutex;
use embedded_hal_async::delay::DelayNs;
use embedded_io_async::Write;
use heapless::Vec;

use crate::config::ConfigStore;
use crate::player::{Player, PlayerError};

/// Most tracks one `trl` line can name.
pub const TRACK_LIST_MAX: usize = 16;

/// Errors from parsing a script line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ScriptError {
    UnknownVerb,
    MissingArgument,
    InvalidNumber,
    TooManyArguments,
}

/// A parsed instruction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScriptCommand {
    Track(u16),
    TrackList(Vec<u16, TRACK_LIST_MAX>),
    Next,
    Prev,
    Reset,
    /// Device volume units.
    Volume(u8),
    Stop,
    /// Milliseconds.
    Sleep(u32),
}

/// One non-blank script line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScriptLine<'a> {
    Comment(&'a str),
    Command(ScriptCommand),
}

/// Errors from running a script.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum RunError {
    /// Line `line` (1-based) did not parse.
    Parse { line: usize, error: ScriptError },
    Player(PlayerError),
}

impl From<PlayerError> for RunError {
    fn from(e: PlayerError) -> Self {
        RunError::Player(e)
    }
}

/// Parse one line. Blank lines give `None`.
pub fn parse_line(line: &str) -> Result<Option<ScriptLine<'_>>, ScriptError> {
    let line = line.trim();
    if line.is_empty() {
        return Ok(None);
    }
    if line.starts_with('#') {
        return Ok(Some(ScriptLine::Comment(line)));
    }

    let mut tokens = line.split([' ', ',', '\t']).filter(|t| !t.is_empty());
    let Some(verb) = tokens.next() else {
        return Ok(None);
    };

    let command = match verb {
        "trk" => ScriptCommand::Track(single(&mut tokens)?),
        "trl" => {
            let mut tracks: Vec<u16, TRACK_LIST_MAX> = Vec::new();
            for token in tokens {
                let track: u16 = number(token)?;
                tracks.push(track).map_err(|_| ScriptError::TooManyArguments)?;
            }
            if tracks.is_empty() {
                return Err(ScriptError::MissingArgument);
            }
            ScriptCommand::TrackList(tracks)
        }
        "nxt" => bare(tokens, ScriptCommand::Next)?,
        "prv" => bare(tokens, ScriptCommand::Prev)?,
        "rst" => bare(tokens, ScriptCommand::Reset)?,
        "stp" => bare(tokens, ScriptCommand::Stop)?,
        "vol" => {
            let level: u8 = single(&mut tokens)?;
            if level > VOLUME_MAX {
                return Err(ScriptError::InvalidNumber);
            }
            ScriptCommand::Volume(level)
        }
        "zzz" => ScriptCommand::Sleep(single(&mut tokens)?),
        _ => return Err(ScriptError::UnknownVerb),
    };

    Ok(Some(ScriptLine::Command(command)))
}

fn number<T: core::str::FromStr>(token: &str) -> Result<T, ScriptError> {
    token.parse().map_err(|_| ScriptError::InvalidNumber)
}

fn single<'a, T: core::str::FromStr>(
    tokens: &mut impl Iterator<Item = &'a str>,
) -> Result<T, ScriptError> {
    let value = number(tokens.next().ok_or(ScriptError::MissingArgument)?)?;
    if tokens.next().is_some() {
        return Err(ScriptError::TooManyArguments);
    }
    Ok(value)
}

fn bare<'a>(
    mut tokens: impl Iterator<Item = &'a str>,
    command: ScriptCommand,
) -> Result<ScriptCommand, ScriptError> {
    match tokens.next() {
        Some(_) => Err(ScriptError::TooManyArguments),
        None => Ok(command),
    }
}

/// Run every line of `script` against `player`, stopping at the first error.
///
/// `delay` paces `zzz` lines.
pub async fn run_script<M, W, D, S, const N: usize>(
    player: &mut Player<'_, M, W, D, S, N>,
    delay: &mut impl DelayNs,
    script: &str,
) -> Result<(), RunError>
where
    M: RawMutex,
    W: Write,
    D: DelayNs,
    S: ConfigStore,
{
    for (index, text) in script.lines().enumerate() {
        let parsed = parse_line(text).map_err(|error| {
            warn!("script line {}: {}", index + 1, error);
            RunError::Parse {
                line: index + 1,
                error,
            }
        })?;
        match parsed {
            None => {}
            Some(ScriptLine::Comment(comment)) => info!("{}", comment),
            Some(ScriptLine::Command(command)) => run_command(player, delay, command).await?,
        }
    }
    Ok(())
}

async fn run_command<M, W, D, S, const N: usize>(
    player: &mut Player<'_, M, W, D, S, N>,
    delay: &mut impl DelayNs,
    command: ScriptCommand,
) -> Result<(), PlayerError>
where
    M: RawMutex,
    W: Write,
    D: DelayNs,
    S: ConfigStore,
{
    match command {
        ScriptCommand::Track(track) => {
            player.play_track(track).await?;
        }
        ScriptCommand::TrackList(tracks) => player.play_list(&tracks).await?,
        ScriptCommand::Next => {
            player.next_track().await?;
        }
        ScriptCommand::Prev => {
            player.prev_track().await?;
        }
        ScriptCommand::Reset => player.reset().await?,
        ScriptCommand::Volume(level) => {
            let factor = player.settings().factor();
            player.set_volume(level / factor).await?;
        }
        ScriptCommand::Stop => player.stop().await?,
        ScriptCommand::Sleep(ms) => {
            player.handler().track_end().wait().await;
            delay.delay_ms(ms).await;
        }
    }
    Ok(())
}
