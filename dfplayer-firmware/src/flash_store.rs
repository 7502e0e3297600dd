//! [`ConfigStore`] backed by the RP2040 QSPI flash.
//!
//! The record lives under a single key in a `sequential-storage` map that
//! occupies the last 64KB of flash, so repeated saves are wear-levelled.

use core::ops::Range;

use defmt::warn;
use dfplayer_core::config::CONFIG_MAX_SIZE;
use dfplayer_core::{ConfigError, ConfigStore, PlayerConfig};
use embassy_rp::dma::Channel;
use embassy_rp::flash::{Async, Flash};
use embassy_rp::peripherals::FLASH;
use embassy_rp::Peri;
use sequential_storage::cache::NoCache;
use sequential_storage::map;

pub const FLASH_SIZE: usize = 2 * 1024 * 1024;
pub const CONFIG_PARTITION_SIZE: usize = 64 * 1024;
pub const CONFIG_PARTITION_START: usize = FLASH_SIZE - CONFIG_PARTITION_SIZE;

pub const CONFIG_RANGE: Range<u32> = (CONFIG_PARTITION_START as u32)..(FLASH_SIZE as u32);

/// Map key of the player record.
const CONFIG_KEY: u8 = 0;

/// Scratch space for one map entry: key, length header and record.
const ITEM_BUF_SIZE: usize = 128;

pub struct FlashConfigStore<'d> {
    flash: Flash<'d, FLASH, Async, FLASH_SIZE>,
}

impl<'d> FlashConfigStore<'d> {
    pub fn new(flash: Peri<'d, FLASH>, dma: Peri<'d, impl Channel>) -> Self {
        Self {
            flash: Flash::new(flash, dma),
        }
    }
}

impl ConfigStore for FlashConfigStore<'_> {
    async fn load(&mut self) -> Result<Option<PlayerConfig>, ConfigError> {
        let mut buf = [0u8; ITEM_BUF_SIZE];
        let item = map::fetch_item::<u8, &[u8], _>(
            &mut self.flash,
            CONFIG_RANGE,
            &mut NoCache::new(),
            &mut buf,
            &CONFIG_KEY,
        )
        .await
        .map_err(|e| {
            warn!("flash read failed: {:?}", defmt::Debug2Format(&e));
            ConfigError::Storage
        })?;

        item.map(PlayerConfig::decode).transpose()
    }

    async fn save(&mut self, config: &PlayerConfig) -> Result<(), ConfigError> {
        let mut record = [0u8; CONFIG_MAX_SIZE];
        let bytes: &[u8] = config.encode(&mut record)?;

        let mut buf = [0u8; ITEM_BUF_SIZE];
        map::store_item(
            &mut self.flash,
            CONFIG_RANGE,
            &mut NoCache::new(),
            &mut buf,
            &CONFIG_KEY,
            &bytes,
        )
        .await
        .map_err(|e| {
            warn!("flash write failed: {:?}", defmt::Debug2Format(&e));
            ConfigError::Storage
        })
    }
}
