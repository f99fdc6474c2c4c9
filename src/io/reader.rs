//! Card reader hardware seam
//!
//! Mirrors the command set of an ISO 14443A proximity coupling device
//! (REQA/anti-collision/select, MIFARE authenticate and read, HLTA).
//! A hardware driver implements `CardReader`; the node only ever talks to
//! the trait.

use crate::domain::types::{CardSerial, MifareKey, Uid};
use async_trait::async_trait;
use std::fmt;

/// Failure reported by the reader for a single exchange
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReaderError {
    /// No answer from the card in time
    Timeout,
    /// Several cards answered during anti-collision
    Collision,
    /// Frame CRC mismatch
    Crc,
    /// Sector key rejected by the card
    Auth,
    /// Command requires a selected card (or an authenticated sector)
    NoSelection,
    /// Transport to the reader chip failed
    Io(String),
}

impl fmt::Display for ReaderError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReaderError::Timeout => f.write_str("timeout in communication"),
            ReaderError::Collision => f.write_str("collision detected"),
            ReaderError::Crc => f.write_str("CRC mismatch"),
            ReaderError::Auth => f.write_str("authentication failed"),
            ReaderError::NoSelection => f.write_str("no card selected"),
            ReaderError::Io(msg) => write!(f, "reader I/O error: {}", msg),
        }
    }
}

impl std::error::Error for ReaderError {}

#[async_trait]
pub trait CardReader: Send {
    /// REQA request. Must return immediately when no card is in the field.
    async fn is_new_card_present(&mut self) -> bool;

    /// Anti-collision and select; yields the UID and SAK of the selected card
    async fn read_card_serial(&mut self) -> Result<CardSerial, ReaderError>;

    /// Authenticate the sector holding `block` with `key` as key A
    async fn authenticate(
        &mut self,
        block: u8,
        key: &MifareKey,
        uid: &Uid,
    ) -> Result<(), ReaderError>;

    /// Read one block. Readers may append CRC bytes after the 16 data bytes.
    async fn read_block(&mut self, block: u8) -> Result<Vec<u8>, ReaderError>;

    /// HLTA: put the selected card to sleep and end the session
    async fn halt(&mut self) -> Result<(), ReaderError>;

    /// Leave the authenticated (encrypted) state
    async fn stop_crypto(&mut self);
}
