//! Shared types for the reader node

use smallvec::SmallVec;

/// Size of one MIFARE Classic data block
pub const BLOCK_LEN: usize = 16;

/// Shortest UID a proximity card reports (single size)
pub const MIN_UID_LEN: usize = 4;

/// Longest UID a proximity card reports (triple size)
pub const MAX_UID_LEN: usize = 10;

/// Tag unique identifier as reported during anti-collision (4, 7 or 10 bytes)
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Uid(SmallVec<[u8; MAX_UID_LEN]>);

impl Uid {
    /// Build a UID from raw bytes, rejecting lengths a reader cannot report
    pub fn from_slice(bytes: &[u8]) -> Option<Self> {
        if (MIN_UID_LEN..=MAX_UID_LEN).contains(&bytes.len()) {
            Some(Self(SmallVec::from_slice(bytes)))
        } else {
            None
        }
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Lowercase hex, two digits per byte, no separator
    pub fn to_hex(&self) -> String {
        hex::encode(&self.0)
    }
}

impl std::fmt::Display for Uid {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.to_hex())
    }
}

/// Card protocol subtype derived from the select-acknowledge (SAK) byte
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PiccType {
    /// UID not complete, cascade level pending
    NotComplete,
    MifareMini,
    Mifare1K,
    Mifare4K,
    MifareUltralight,
    MifarePlus,
    Tnp3xxx,
    Iso14443_4,
    Iso18092,
    Unknown,
}

impl PiccType {
    pub fn from_sak(sak: u8) -> Self {
        // Bit 8 is reserved (RFU) and ignored.
        match sak & 0x7F {
            0x04 => PiccType::NotComplete,
            0x09 => PiccType::MifareMini,
            0x08 => PiccType::Mifare1K,
            0x18 => PiccType::Mifare4K,
            0x00 => PiccType::MifareUltralight,
            0x10 | 0x11 => PiccType::MifarePlus,
            0x01 => PiccType::Tnp3xxx,
            0x20 => PiccType::Iso14443_4,
            0x40 => PiccType::Iso18092,
            _ => PiccType::Unknown,
        }
    }

    /// Tags whose memory is split in key-protected sectors (MIFARE Classic family)
    pub fn has_sector_memory(&self) -> bool {
        matches!(self, PiccType::MifareMini | PiccType::Mifare1K | PiccType::Mifare4K)
    }

    pub fn as_str(&self) -> &str {
        match self {
            PiccType::NotComplete => "not_complete",
            PiccType::MifareMini => "mifare_mini",
            PiccType::Mifare1K => "mifare_1k",
            PiccType::Mifare4K => "mifare_4k",
            PiccType::MifareUltralight => "mifare_ultralight",
            PiccType::MifarePlus => "mifare_plus",
            PiccType::Tnp3xxx => "tnp3xxx",
            PiccType::Iso14443_4 => "iso14443_4",
            PiccType::Iso18092 => "iso18092",
            PiccType::Unknown => "unknown",
        }
    }
}

/// Six-byte MIFARE sector key
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MifareKey(pub [u8; 6]);

impl MifareKey {
    /// Factory default transport key (all 0xFF)
    pub const DEFAULT: MifareKey = MifareKey([0xFF; 6]);

    /// Parse a key written as 12 hex digits
    pub fn from_hex(s: &str) -> anyhow::Result<Self> {
        let bytes = hex::decode(s.trim())?;
        let key: [u8; 6] = bytes
            .try_into()
            .map_err(|b: Vec<u8>| anyhow::anyhow!("key must be 6 bytes, got {}", b.len()))?;
        Ok(Self(key))
    }
}

impl Default for MifareKey {
    fn default() -> Self {
        Self::DEFAULT
    }
}

/// Result of one anti-collision/select exchange
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CardSerial {
    pub uid: Uid,
    pub sak: u8,
}

/// What one poll cycle extracted from a card. Lives for a single cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawRead {
    pub uid: Uid,
    pub sak: u8,
    /// Present only when the authenticated block read succeeded
    pub memory_block: Option<[u8; BLOCK_LEN]>,
}

impl RawRead {
    pub fn picc_type(&self) -> PiccType {
        PiccType::from_sak(self.sak)
    }
}
