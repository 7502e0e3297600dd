//! Equalizer presets.

/// Tone preset selected with [`Opcode::EqSet`](crate::Opcode::EqSet).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[repr(u8)]
pub enum Equalizer {
    #[default]
    Normal = 0,
    Pop = 1,
    Rock = 2,
    Jazz = 3,
    Classic = 4,
    Bass = 5,
}

impl Equalizer {
    /// All presets in index order.
    pub const ALL: [Equalizer; 6] = [
        Equalizer::Normal,
        Equalizer::Pop,
        Equalizer::Rock,
        Equalizer::Jazz,
        Equalizer::Classic,
        Equalizer::Bass,
    ];

    /// Device parameter for this preset.
    #[inline]
    #[must_use]
    pub const fn index(self) -> u16 {
        self as u16
    }

    /// Preset for a device parameter, if in range.
    #[must_use]
    pub const fn from_index(index: u16) -> Option<Self> {
        match index {
            0 => Some(Equalizer::Normal),
            1 => Some(Equalizer::Pop),
            2 => Some(Equalizer::Rock),
            3 => Some(Equalizer::Jazz),
            4 => Some(Equalizer::Classic),
            5 => Some(Equalizer::Bass),
            _ => None,
        }
    }

    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Equalizer::Normal => "normal",
            Equalizer::Pop => "pop",
            Equalizer::Rock => "rock",
            Equalizer::Jazz => "jazz",
            Equalizer::Classic => "classic",
            Equalizer::Bass => "bass",
        }
    }

    #[must_use]
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|eq| eq.name() == name)
    }
}
