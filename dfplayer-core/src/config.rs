//! Persisted player settings.
//!
//! The record is serialised with `postcard`; where the bytes live is up to
//! the [`ConfigStore`] implementation (RAM for tests, flash on the target).

use core::future::Future;

use dfplayer_proto::{Equalizer, VOLUME_MAX};
use heapless::{String, Vec};
use serde::{Deserialize, Serialize};

/// Longest player name that can be stored.
pub const NAME_MAX_LEN: usize = 24;

/// Upper bound on the encoded size of a [`PlayerConfig`].
pub const CONFIG_MAX_SIZE: usize = 64;

pub const DEFAULT_NAME: &str = "DFPlayer Mini";
pub const DEFAULT_VOL_FACTOR: u8 = 3;
pub const DEFAULT_VOL: u8 = 15;

/// Errors from encoding or storing the config record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ConfigError {
    /// Record does not fit the encode buffer.
    Encode,
    /// Stored bytes are not a valid record.
    Decode,
    /// Backing storage failed.
    Storage,
}

/// Player settings that survive a restart.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlayerConfig {
    pub name: String<NAME_MAX_LEN>,
    /// Device volume steps per user volume step.
    pub vol_factor: u8,
    /// Device volume, `0..=30`.
    pub vol: u8,
    pub eq: Equalizer,
}

impl Default for PlayerConfig {
    fn default() -> Self {
        let mut name = String::new();
        // Always fits: DEFAULT_NAME is shorter than NAME_MAX_LEN.
        let _ = name.push_str(DEFAULT_NAME);
        Self {
            name,
            vol_factor: DEFAULT_VOL_FACTOR,
            vol: DEFAULT_VOL,
            eq: Equalizer::Normal,
        }
    }
}

impl PlayerConfig {
    /// Volume scale factor, never zero.
    #[inline]
    #[must_use]
    pub fn factor(&self) -> u8 {
        self.vol_factor.max(1)
    }

    /// Stored device volume expressed in user levels.
    #[must_use]
    pub fn user_volume(&self) -> u8 {
        self.vol.min(VOLUME_MAX) / self.factor()
    }

    /// Serialise into `buf`, returning the used prefix.
    pub fn encode<'b>(&self, buf: &'b mut [u8]) -> Result<&'b mut [u8], ConfigError> {
        postcard::to_slice(self, buf).map_err(|_| ConfigError::Encode)
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, ConfigError> {
        postcard::from_bytes(bytes).map_err(|_| ConfigError::Decode)
    }
}

/// Durable home for a [`PlayerConfig`].
pub trait ConfigStore {
    /// Load the stored record, or `None` if nothing has been saved yet.
    fn load(&mut self) -> impl Future<Output = Result<Option<PlayerConfig>, ConfigError>>;

    /// Replace the stored record.
    fn save(&mut self, config: &PlayerConfig) -> impl Future<Output = Result<(), ConfigError>>;
}

/// Keeps the encoded record in RAM.
#[derive(Debug, Default)]
pub struct MemoryConfigStore {
    bytes: Option<Vec<u8, CONFIG_MAX_SIZE>>,
    saves: usize,
}

impl MemoryConfigStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start from already-encoded bytes.
    pub fn with_bytes(bytes: &[u8]) -> Result<Self, ConfigError> {
        let bytes = Vec::from_slice(bytes).map_err(|_| ConfigError::Storage)?;
        Ok(Self {
            bytes: Some(bytes),
            saves: 0,
        })
    }

    /// Number of successful saves.
    #[must_use]
    pub fn saves(&self) -> usize {
        self.saves
    }

    #[must_use]
    pub fn bytes(&self) -> Option<&[u8]> {
        self.bytes.as_deref()
    }
}

impl ConfigStore for MemoryConfigStore {
    async fn load(&mut self) -> Result<Option<PlayerConfig>, ConfigError> {
        self.bytes.as_deref().map(PlayerConfig::decode).transpose()
    }

    async fn save(&mut self, config: &PlayerConfig) -> Result<(), ConfigError> {
        let mut buf = [0u8; CONFIG_MAX_SIZE];
        let used = config.encode(&mut buf)?;
        let bytes = Vec::from_slice(used).map_err(|_| ConfigError::Storage)?;
        self.bytes = Some(bytes);
        self.saves += 1;
        Ok(())
    }
}
