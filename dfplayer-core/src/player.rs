//! Player: a small domain layer over the [`CommandHandler`].
//!
//! Adds a user volume scale, a playback cursor for next/previous and
//! "wait for the current track to end, then play" sequencing, and keeps the
//! [`PlayerConfig`] in step with the device.

use dfplayer_proto::{Equalizer, VOLUME_MAX};
use embassy_sync::blocking_mutex::raw::RawMutex;
use embedded_hal_async::delay::DelayNs;
use embedded_io_async::Write;

use crate::config::{ConfigError, ConfigStore, PlayerConfig};
use crate::handler::{CommandError, CommandHandler, Query};

/// Top of the user volume scale.
pub const USER_VOLUME_MAX: u8 = 10;

/// Error type for player operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum PlayerError {
    Command(CommandError),
    Config(ConfigError),
    /// Name not in the equalizer table.
    UnknownEq,
}

impl From<CommandError> for PlayerError {
    fn from(e: CommandError) -> Self {
        PlayerError::Command(e)
    }
}

impl From<ConfigError> for PlayerError {
    fn from(e: ConfigError) -> Self {
        PlayerError::Config(e)
    }
}

/// DFPlayer facade with persisted settings in `S`.
pub struct Player<'a, M: RawMutex, W, D, S, const N: usize> {
    handler: &'a CommandHandler<'a, M, W, D, N>,
    store: S,
    config: PlayerConfig,
    volume: u8,
    cursor: u16,
}

impl<'a, M, W, D, S, const N: usize> Player<'a, M, W, D, S, N>
where
    M: RawMutex,
    W: Write,
    D: DelayNs,
    S: ConfigStore,
{
    /// Create a player with default settings. Call [`startup`](Self::startup)
    /// before playing anything.
    pub fn new(handler: &'a CommandHandler<'a, M, W, D, N>, store: S) -> Self {
        let config = PlayerConfig::default();
        Self {
            handler,
            store,
            volume: config.user_volume(),
            config,
            cursor: 0,
        }
    }

    /// Load settings, reset the module and apply volume and equalizer.
    ///
    /// An empty store is seeded with defaults. A store holding bytes that do
    /// not decode is overwritten with defaults.
    pub async fn startup(&mut self) -> Result<(), PlayerError> {
        self.config = match self.store.load().await {
            Ok(Some(config)) => config,
            Ok(None) => {
                info!("no stored config, writing defaults");
                self.seed_defaults().await?
            }
            Err(ConfigError::Decode) => {
                warn!("stored config unreadable, writing defaults");
                self.seed_defaults().await?
            }
            Err(e) => return Err(e.into()),
        };
        info!("config loaded: vol {} eq {}", self.config.vol, self.config.eq.name());
        self.reset().await
    }

    /// Reset the module, re-read the track count and reapply volume and
    /// equalizer from the current settings.
    pub async fn reset(&mut self) -> Result<(), PlayerError> {
        self.handler.reset().await?;
        let tracks = self.handler.query(Query::SdFiles).await?;
        info!("{} tracks", tracks);

        self.volume = self.config.user_volume().min(USER_VOLUME_MAX);
        self.handler.set_volume(self.device_volume(self.volume)).await?;
        self.handler.set_eq(self.config.eq).await?;

        // Nothing is playing yet.
        self.handler.track_end().set();
        Ok(())
    }

    async fn seed_defaults(&mut self) -> Result<PlayerConfig, PlayerError> {
        let config = PlayerConfig::default();
        self.store.save(&config).await?;
        Ok(config)
    }

    fn device_volume(&self, level: u8) -> u8 {
        level.saturating_mul(self.config.factor()).min(VOLUME_MAX)
    }

    /// Play track `track`.
    ///
    /// Returns `Ok(false)` without touching the device if `track` is outside
    /// `1..=track_count`.
    pub async fn play_track(&mut self, track: u16) -> Result<bool, PlayerError> {
        if let Some(fault) = self.handler.device_fault() {
            return Err(CommandError::Device(fault).into());
        }
        if track == 0 || track > self.handler.track_count() {
            debug!("track {} out of range", track);
            return Ok(false);
        }
        self.handler.play_track(track).await?;
        self.cursor = track;
        Ok(true)
    }

    /// Wait for the current track to end, then play `track`.
    pub async fn play_track_after(&mut self, track: u16) -> Result<bool, PlayerError> {
        self.handler.track_end().wait().await;
        self.play_track(track).await
    }

    /// Play each track in turn, each after the previous one ends.
    pub async fn play_list(&mut self, tracks: &[u16]) -> Result<(), PlayerError> {
        for &track in tracks {
            self.play_track_after(track).await?;
        }
        Ok(())
    }

    /// Advance the cursor, wrapping to the first track, and play it.
    pub async fn next_track(&mut self) -> Result<bool, PlayerError> {
        let count = self.handler.track_count();
        if count == 0 {
            return Ok(false);
        }
        let track = if self.cursor >= count { 1 } else { self.cursor + 1 };
        self.play_track_after(track).await
    }

    /// Step the cursor back, wrapping to the last track, and play it.
    pub async fn prev_track(&mut self) -> Result<bool, PlayerError> {
        let count = self.handler.track_count();
        if count == 0 {
            return Ok(false);
        }
        let track = if self.cursor <= 1 || self.cursor > count {
            count
        } else {
            self.cursor - 1
        };
        self.play_track_after(track).await
    }

    pub async fn pause(&mut self) -> Result<(), PlayerError> {
        Ok(self.handler.pause().await?)
    }

    pub async fn resume(&mut self) -> Result<(), PlayerError> {
        Ok(self.handler.play().await?)
    }

    /// Stop playback and release anyone waiting for the track to end.
    pub async fn stop(&mut self) -> Result<(), PlayerError> {
        self.handler.pause().await?;
        self.handler.track_end().set();
        Ok(())
    }

    /// Set the user volume, `0..=10`, and persist it.
    pub async fn set_volume(&mut self, level: u8) -> Result<(), PlayerError> {
        let level = level.min(USER_VOLUME_MAX);
        if level == self.volume {
            return Ok(());
        }
        let device = self.device_volume(level);
        self.handler.set_volume(device).await?;
        self.volume = level;
        self.config.vol = device;
        self.save_config().await
    }

    pub async fn inc_volume(&mut self) -> Result<(), PlayerError> {
        self.set_volume(self.volume.saturating_add(1)).await
    }

    pub async fn dec_volume(&mut self) -> Result<(), PlayerError> {
        self.set_volume(self.volume.saturating_sub(1)).await
    }

    /// Select an equalizer preset by name and persist it.
    pub async fn set_eq(&mut self, name: &str) -> Result<(), PlayerError> {
        let eq = Equalizer::from_name(name).ok_or(PlayerError::UnknownEq)?;
        if eq == self.config.eq {
            return Ok(());
        }
        self.handler.set_eq(eq).await?;
        self.config.eq = eq;
        self.save_config().await
    }

    pub async fn save_config(&mut self) -> Result<(), PlayerError> {
        Ok(self.store.save(&self.config).await?)
    }

    /// User volume level.
    #[must_use]
    pub fn volume(&self) -> u8 {
        self.volume
    }

    #[must_use]
    pub fn cursor(&self) -> u16 {
        self.cursor
    }

    #[must_use]
    pub fn settings(&self) -> &PlayerConfig {
        &self.config
    }

    pub fn handler(&self) -> &'a CommandHandler<'a, M, W, D, N> {
        self.handler
    }

    pub fn store(&self) -> &S {
        &self.store
    }
}
