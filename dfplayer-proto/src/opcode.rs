//! Command opcodes.
//!
//! The opcode table is closed: every byte the host sends or the module reports
//! has exactly one [`Opcode`] variant and exactly one symbolic name. Bytes
//! outside the table are rejected by [`Opcode::from_u8`].

/// Bit set in the `QueryInit` parameter when an SD card is online.
pub const STORAGE_SD_CARD: u16 = 0x0002;

/// A command selector carried in byte 3 of every frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u8)]
pub enum Opcode {
    /// Play the next track.
    Next = 0x01,
    /// Play the previous track.
    Prev = 0x02,
    /// Play a track by number (1-3000).
    Track = 0x03,
    /// Volume up one step.
    VolInc = 0x04,
    /// Volume down one step.
    VolDec = 0x05,
    /// Set volume (0-30).
    VolSet = 0x06,
    /// Select an equalizer preset (0-5).
    EqSet = 0x07,
    /// Repeat a track by number.
    RepeatTrack = 0x08,
    /// Reset the module.
    Reset = 0x0C,
    /// Start or resume playback.
    Play = 0x0D,
    /// Pause playback.
    Stop = 0x0E,
    /// Play a track in a folder (high byte folder, low byte track).
    FolderTrack = 0x0F,
    /// Repeat all tracks in the root folder (0: stop, 1: start).
    RepeatAll = 0x11,
    /// Storage inserted (module to host).
    MediaInsert = 0x3A,
    /// Storage removed (module to host).
    MediaRemove = 0x3B,
    /// SD track finished playing (module to host).
    SdFinish = 0x3D,
    /// Online storage after power-up or reset.
    QueryInit = 0x3F,
    /// Error report (module to host).
    Error = 0x40,
    /// Command acknowledgement (module to host).
    Ack = 0x41,
    /// Playback status (0: stopped, 1: playing, 2: paused).
    QueryStatus = 0x42,
    /// Current volume.
    QueryVolume = 0x43,
    /// Current equalizer preset.
    QueryEq = 0x44,
    /// Number of files on the SD card.
    QuerySdFiles = 0x48,
    /// Current SD track.
    QuerySdTrack = 0x4C,
}

impl Opcode {
    /// Every opcode with its symbolic name, in byte order.
    pub const ALL: [(Opcode, &'static str); 24] = [
        (Opcode::Next, "next"),
        (Opcode::Prev, "prev"),
        (Opcode::Track, "track"),
        (Opcode::VolInc, "vol_inc"),
        (Opcode::VolDec, "vol_dec"),
        (Opcode::VolSet, "vol_set"),
        (Opcode::EqSet, "eq_set"),
        (Opcode::RepeatTrack, "repeat_track"),
        (Opcode::Reset, "reset"),
        (Opcode::Play, "play"),
        (Opcode::Stop, "stop"),
        (Opcode::FolderTrack, "folder_track"),
        (Opcode::RepeatAll, "repeat_all"),
        (Opcode::MediaInsert, "media_insert"),
        (Opcode::MediaRemove, "media_remove"),
        (Opcode::SdFinish, "sd_finish"),
        (Opcode::QueryInit, "query_init"),
        (Opcode::Error, "error"),
        (Opcode::Ack, "ack"),
        (Opcode::QueryStatus, "query_status"),
        (Opcode::QueryVolume, "query_volume"),
        (Opcode::QueryEq, "query_eq"),
        (Opcode::QuerySdFiles, "query_sd_files"),
        (Opcode::QuerySdTrack, "query_sd_track"),
    ];

    /// Get the opcode as a byte value.
    #[inline]
    #[must_use]
    pub const fn as_u8(self) -> u8 {
        self as u8
    }

    /// Create an opcode from a byte value.
    #[must_use]
    pub const fn from_u8(value: u8) -> Option<Self> {
        Some(match value {
            0x01 => Opcode::Next,
            0x02 => Opcode::Prev,
            0x03 => Opcode::Track,
            0x04 => Opcode::VolInc,
            0x05 => Opcode::VolDec,
            0x06 => Opcode::VolSet,
            0x07 => Opcode::EqSet,
            0x08 => Opcode::RepeatTrack,
            0x0C => Opcode::Reset,
            0x0D => Opcode::Play,
            0x0E => Opcode::Stop,
            0x0F => Opcode::FolderTrack,
            0x11 => Opcode::RepeatAll,
            0x3A => Opcode::MediaInsert,
            0x3B => Opcode::MediaRemove,
            0x3D => Opcode::SdFinish,
            0x3F => Opcode::QueryInit,
            0x40 => Opcode::Error,
            0x41 => Opcode::Ack,
            0x42 => Opcode::QueryStatus,
            0x43 => Opcode::QueryVolume,
            0x44 => Opcode::QueryEq,
            0x48 => Opcode::QuerySdFiles,
            0x4C => Opcode::QuerySdTrack,
            _ => return None,
        })
    }

    /// Symbolic name used in logs and command scripts.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Opcode::Next => "next",
            Opcode::Prev => "prev",
            Opcode::Track => "track",
            Opcode::VolInc => "vol_inc",
            Opcode::VolDec => "vol_dec",
            Opcode::VolSet => "vol_set",
            Opcode::EqSet => "eq_set",
            Opcode::RepeatTrack => "repeat_track",
            Opcode::Reset => "reset",
            Opcode::Play => "play",
            Opcode::Stop => "stop",
            Opcode::FolderTrack => "folder_track",
            Opcode::RepeatAll => "repeat_all",
            Opcode::MediaInsert => "media_insert",
            Opcode::MediaRemove => "media_remove",
            Opcode::SdFinish => "sd_finish",
            Opcode::QueryInit => "query_init",
            Opcode::Error => "error",
            Opcode::Ack => "ack",
            Opcode::QueryStatus => "query_status",
            Opcode::QueryVolume => "query_volume",
            Opcode::QueryEq => "query_eq",
            Opcode::QuerySdFiles => "query_sd_files",
            Opcode::QuerySdTrack => "query_sd_track",
        }
    }

    /// Look up an opcode by its symbolic name.
    #[must_use]
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL
            .iter()
            .find(|(_, n)| *n == name)
            .map(|&(op, _)| op)
    }

    /// Commands that start playback.
    ///
    /// Sending one of these clears the track-end condition, since a new track
    /// is about to play.
    #[inline]
    #[must_use]
    pub const fn is_play_triggering(self) -> bool {
        matches!(
            self,
            Opcode::Play
                | Opcode::Next
                | Opcode::Prev
                | Opcode::Track
                | Opcode::FolderTrack
                | Opcode::RepeatTrack
                | Opcode::RepeatAll
        )
    }
}

impl TryFrom<u8> for Opcode {
    type Error = u8;

    fn try_from(value: u8) -> Result<Self, u8> {
        Opcode::from_u8(value).ok_or(value)
    }
}

impl From<Opcode> for u8 {
    fn from(op: Opcode) -> Self {
        op.as_u8()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_byte_table_is_bijective() {
        for &(op, _) in Opcode::ALL.iter() {
            assert_eq!(Opcode::from_u8(op.as_u8()), Some(op));
        }
        let known = (0u8..=255).filter(|&b| Opcode::from_u8(b).is_some()).count();
        assert_eq!(known, Opcode::ALL.len());
    }

    #[test]
    fn test_name_table_is_bijective() {
        for &(op, name) in Opcode::ALL.iter() {
            assert_eq!(op.name(), name);
            assert_eq!(Opcode::from_name(name), Some(op));
        }
        for (i, (_, a)) in Opcode::ALL.iter().enumerate() {
            for (_, b) in Opcode::ALL.iter().skip(i + 1) {
                assert_ne!(a, b);
            }
        }
    }

    #[test]
    fn test_unknown_values() {
        assert_eq!(Opcode::from_u8(0x00), None);
        assert_eq!(Opcode::from_u8(0x09), None);
        assert_eq!(Opcode::from_u8(0xFF), None);
        assert_eq!(Opcode::try_from(0x4D), Err(0x4D));
        assert_eq!(Opcode::from_name("q_vol"), None);
    }

    #[test]
    fn test_play_triggering_set() {
        let playing: usize = Opcode::ALL
            .iter()
            .filter(|(op, _)| op.is_play_triggering())
            .count();
        assert_eq!(playing, 7);
        assert!(Opcode::FolderTrack.is_play_triggering());
        assert!(!Opcode::Stop.is_play_triggering());
        assert!(!Opcode::VolSet.is_play_triggering());
    }
}
