//! Tag acquisition - one reader poll into one `RawRead`
//!
//! Per cycle: request, select, classify the SAK and, for MIFARE Classic
//! cards, authenticate and read one block. Hardware failures after
//! selection only downgrade the read to identifier-only. Once a card has
//! been detected it is always halted and the crypto session stopped before
//! `poll` returns, otherwise the reader stays locked to that card.

use crate::domain::types::{MifareKey, PiccType, RawRead, Uid, BLOCK_LEN};
use crate::infra::metrics::Metrics;
use crate::io::reader::CardReader;
use std::sync::Arc;
use tracing::{debug, trace, warn};

pub struct TagAcquisition<R: CardReader> {
    reader: R,
    block: u8,
    key: MifareKey,
    metrics: Arc<Metrics>,
}

impl<R: CardReader> TagAcquisition<R> {
    pub fn new(reader: R, block: u8, key: MifareKey, metrics: Arc<Metrics>) -> Self {
        Self { reader, block, key, metrics }
    }

    pub fn reader(&self) -> &R {
        &self.reader
    }

    /// Poll the reader once. `None` when no card is in the field or
    /// selection failed; never waits for a card.
    pub async fn poll(&mut self) -> Option<RawRead> {
        if !self.reader.is_new_card_present().await {
            return None;
        }

        let raw = self.read_selected().await;
        self.release().await;
        raw
    }

    async fn read_selected(&mut self) -> Option<RawRead> {
        let serial = match self.reader.read_card_serial().await {
            Ok(serial) => serial,
            Err(e) => {
                debug!(error = %e, "card_select_failed");
                return None;
            }
        };
        self.metrics.record_card();

        let picc_type = PiccType::from_sak(serial.sak);
        debug!(uid = %serial.uid, sak = serial.sak, picc_type = %picc_type.as_str(), "card_selected");

        let memory_block = if picc_type.has_sector_memory() {
            self.read_memory_block(&serial.uid).await
        } else {
            None
        };

        Some(RawRead { uid: serial.uid, sak: serial.sak, memory_block })
    }

    async fn read_memory_block(&mut self, uid: &Uid) -> Option<[u8; BLOCK_LEN]> {
        if let Err(e) = self.reader.authenticate(self.block, &self.key, uid).await {
            warn!(uid = %uid, block = self.block, error = %e, "tag_auth_failed");
            self.metrics.record_nfc_degraded();
            return None;
        }

        let data = match self.reader.read_block(self.block).await {
            Ok(data) => data,
            Err(e) => {
                warn!(uid = %uid, block = self.block, error = %e, "tag_block_read_failed");
                self.metrics.record_nfc_degraded();
                return None;
            }
        };

        // Readers append two CRC bytes; only the data bytes are kept.
        let Some(block) = data.get(..BLOCK_LEN).and_then(|b| <[u8; BLOCK_LEN]>::try_from(b).ok())
        else {
            warn!(uid = %uid, block = self.block, len = data.len(), "tag_block_short");
            self.metrics.record_nfc_degraded();
            return None;
        };

        self.metrics.record_nfc_read();
        Some(block)
    }

    async fn release(&mut self) {
        if let Err(e) = self.reader.halt().await {
            debug!(error = %e, "card_halt_failed");
        }
        self.reader.stop_crypto().await;
        trace!("card_released");
    }
}
