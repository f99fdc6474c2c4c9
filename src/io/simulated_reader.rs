//! Scenario-driven card reader
//!
//! Replays card presentations from a TOML file against a clock. While a
//! presentation is in the field every poll detects it again, which is the
//! burst pattern a real reader produces while a card is held still.
//!
//! ```toml
//! loop_ms = 20000          # optional, replay the timeline forever
//!
//! [[presentation]]
//! at_ms = 1000
//! hold_ms = 400
//! uid = "04a1223f"
//! sak = 0x08
//! block = "0102030405060708090a0b0c0d0e0f10"
//! key = "ffffffffffff"     # key the sector accepts (default)
//! collision = false        # true: every select fails with a collision
//! ```

use crate::domain::types::{CardSerial, MifareKey, Uid};
use crate::infra::clock::Clock;
use crate::io::reader::{CardReader, ReaderError};
use anyhow::{bail, Context};
use async_trait::async_trait;
use serde::Deserialize;
use std::fs;
use std::path::Path;
use tracing::trace;

#[derive(Debug, Clone, Deserialize)]
struct ScenarioFile {
    #[serde(default)]
    loop_ms: Option<u64>,
    #[serde(default, rename = "presentation")]
    presentations: Vec<PresentationEntry>,
}

#[derive(Debug, Clone, Deserialize)]
struct PresentationEntry {
    at_ms: u64,
    #[serde(default = "default_hold_ms")]
    hold_ms: u64,
    uid: String,
    #[serde(default)]
    sak: u8,
    #[serde(default)]
    block: Option<String>,
    #[serde(default)]
    key: Option<String>,
    #[serde(default)]
    collision: bool,
}

fn default_hold_ms() -> u64 {
    300
}

/// One card held in front of the reader for a time span
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Presentation {
    pub at_ms: u64,
    pub hold_ms: u64,
    pub uid: Uid,
    pub sak: u8,
    /// Bytes returned by a block read; may be short to model a truncated answer
    pub block: Option<Vec<u8>>,
    pub key: MifareKey,
    /// Anti-collision never settles on this card
    pub collision: bool,
}

impl Presentation {
    fn in_field(&self, t: u64) -> bool {
        t >= self.at_ms && t < self.at_ms.saturating_add(self.hold_ms)
    }
}

/// Parsed presentation timeline
#[derive(Debug, Clone, Default)]
pub struct Scenario {
    pub loop_ms: Option<u64>,
    pub presentations: Vec<Presentation>,
}

impl Scenario {
    pub fn from_file<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read scenario file {}", path.display()))?;
        Self::from_toml_str(&content)
            .with_context(|| format!("Failed to parse scenario file {}", path.display()))
    }

    pub fn from_toml_str(content: &str) -> anyhow::Result<Self> {
        let file: ScenarioFile = toml::from_str(content)?;

        if file.loop_ms == Some(0) {
            bail!("loop_ms must be positive");
        }

        let mut presentations = Vec::with_capacity(file.presentations.len());
        for (i, entry) in file.presentations.into_iter().enumerate() {
            let uid_bytes = hex::decode(&entry.uid)
                .with_context(|| format!("presentation {}: uid is not hex", i))?;
            let Some(uid) = Uid::from_slice(&uid_bytes) else {
                bail!("presentation {}: uid must be 4 to 10 bytes, got {}", i, uid_bytes.len());
            };
            let block = entry
                .block
                .as_deref()
                .map(hex::decode)
                .transpose()
                .with_context(|| format!("presentation {}: block is not hex", i))?;
            let key = match entry.key.as_deref() {
                Some(k) => MifareKey::from_hex(k)
                    .with_context(|| format!("presentation {}: invalid key", i))?,
                None => MifareKey::DEFAULT,
            };

            presentations.push(Presentation {
                at_ms: entry.at_ms,
                hold_ms: entry.hold_ms,
                uid,
                sak: entry.sak,
                block,
                key,
                collision: entry.collision,
            });
        }
        presentations.sort_by_key(|p| p.at_ms);

        Ok(Self { loop_ms: file.loop_ms, presentations })
    }

    /// Card in the field at time `now`, if any
    fn card_at(&self, now: u64) -> Option<usize> {
        let t = match self.loop_ms {
            Some(period) => now % period,
            None => now,
        };
        self.presentations.iter().position(|p| p.in_field(t))
    }
}

/// Reader that answers from a `Scenario`
pub struct SimulatedReader<C: Clock> {
    scenario: Scenario,
    clock: C,
    detected: Option<usize>,
    selected: Option<usize>,
    crypto_active: bool,
    halts: u64,
}

impl<C: Clock> SimulatedReader<C> {
    pub fn new(scenario: Scenario, clock: C) -> Self {
        Self { scenario, clock, detected: None, selected: None, crypto_active: false, halts: 0 }
    }

    /// True when no card session or crypto session is open
    pub fn is_released(&self) -> bool {
        self.selected.is_none() && !self.crypto_active
    }

    /// Number of HLTA commands issued
    pub fn halt_count(&self) -> u64 {
        self.halts
    }

    fn selected_card(&self) -> Result<&Presentation, ReaderError> {
        self.selected
            .and_then(|i| self.scenario.presentations.get(i))
            .ok_or(ReaderError::NoSelection)
    }
}

#[async_trait]
impl<C: Clock> CardReader for SimulatedReader<C> {
    async fn is_new_card_present(&mut self) -> bool {
        self.detected = self.scenario.card_at(self.clock.now_ms());
        self.detected.is_some()
    }

    async fn read_card_serial(&mut self) -> Result<CardSerial, ReaderError> {
        let idx = self.detected.take().ok_or(ReaderError::Timeout)?;
        let card = self.scenario.presentations.get(idx).ok_or(ReaderError::Timeout)?;
        if card.collision {
            return Err(ReaderError::Collision);
        }
        self.selected = Some(idx);
        trace!(uid = %card.uid, sak = card.sak, "sim_card_selected");
        Ok(CardSerial { uid: card.uid.clone(), sak: card.sak })
    }

    async fn authenticate(
        &mut self,
        _block: u8,
        key: &MifareKey,
        uid: &Uid,
    ) -> Result<(), ReaderError> {
        let card = self.selected_card()?;
        if &card.uid != uid || &card.key != key {
            return Err(ReaderError::Auth);
        }
        self.crypto_active = true;
        Ok(())
    }

    async fn read_block(&mut self, _block: u8) -> Result<Vec<u8>, ReaderError> {
        if !self.crypto_active {
            return Err(ReaderError::NoSelection);
        }
        self.selected_card()?.block.clone().ok_or(ReaderError::Timeout)
    }

    async fn halt(&mut self) -> Result<(), ReaderError> {
        self.halts += 1;
        self.detected = None;
        match self.selected.take() {
            Some(_) => Ok(()),
            None => Err(ReaderError::NoSelection),
        }
    }

    async fn stop_crypto(&mut self) {
        self.crypto_active = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infra::clock::ManualClock;

    const SCENARIO: &str = r#"
[[presentation]]
at_ms = 1000
hold_ms = 500
uid = "04a1223f"
sak = 0x08
block = "0102030405060708090a0b0c0d0e0f10"

[[presentation]]
at_ms = 100
uid = "deadbeef"
"#;

    #[test]
    fn test_scenario_parse_sorted_with_defaults() {
        let scenario = Scenario::from_toml_str(SCENARIO).unwrap();
        assert_eq!(scenario.presentations.len(), 2);
        assert_eq!(scenario.presentations[0].uid.to_hex(), "deadbeef");
        assert_eq!(scenario.presentations[0].hold_ms, 300);
        assert_eq!(scenario.presentations[0].sak, 0);
        assert_eq!(scenario.presentations[0].key, MifareKey::DEFAULT);
        assert_eq!(scenario.presentations[1].block.as_ref().unwrap().len(), 16);
    }

    #[test]
    fn test_scenario_rejects_bad_uid() {
        assert!(Scenario::from_toml_str("[[presentation]]\nat_ms = 0\nuid = \"0102\"\n").is_err());
        assert!(Scenario::from_toml_str("[[presentation]]\nat_ms = 0\nuid = \"xyz\"\n").is_err());
        assert!(Scenario::from_toml_str("loop_ms = 0\n").is_err());
    }

    #[test]
    fn test_card_at_with_loop() {
        let mut scenario = Scenario::from_toml_str(SCENARIO).unwrap();
        assert_eq!(scenario.card_at(50), None);
        assert_eq!(scenario.card_at(150), Some(0));
        assert_eq!(scenario.card_at(1499), Some(1));
        assert_eq!(scenario.card_at(1500), None);

        scenario.loop_ms = Some(2000);
        assert_eq!(scenario.card_at(2150), Some(0));
        assert_eq!(scenario.card_at(5200), Some(1));
    }

    #[tokio::test]
    async fn test_select_auth_read_release() {
        let clock = ManualClock::new(1200);
        let mut reader = SimulatedReader::new(Scenario::from_toml_str(SCENARIO).unwrap(), clock);

        assert!(reader.is_new_card_present().await);
        let serial = reader.read_card_serial().await.unwrap();
        assert_eq!(serial.uid.to_hex(), "04a1223f");
        assert_eq!(serial.sak, 0x08);

        reader.authenticate(4, &MifareKey::DEFAULT, &serial.uid).await.unwrap();
        assert_eq!(reader.read_block(4).await.unwrap()[15], 0x10);
        assert!(!reader.is_released());

        reader.halt().await.unwrap();
        reader.stop_crypto().await;
        assert!(reader.is_released());
        assert_eq!(reader.halt_count(), 1);
    }

    #[tokio::test]
    async fn test_wrong_key_rejected() {
        let clock = ManualClock::new(1200);
        let mut reader = SimulatedReader::new(Scenario::from_toml_str(SCENARIO).unwrap(), clock);

        assert!(reader.is_new_card_present().await);
        let serial = reader.read_card_serial().await.unwrap();
        let err = reader
            .authenticate(4, &MifareKey([0; 6]), &serial.uid)
            .await
            .unwrap_err();
        assert_eq!(err, ReaderError::Auth);
        assert_eq!(reader.read_block(4).await.unwrap_err(), ReaderError::NoSelection);
    }

    #[test]
    fn test_hold_past_u64_max_does_not_overflow() {
        let scenario = Scenario {
            loop_ms: None,
            presentations: vec![Presentation {
                at_ms: u64::MAX - 10,
                hold_ms: 1000,
                uid: Uid::from_slice(&[0x04, 0xA1, 0x22, 0x3F]).unwrap(),
                sak: 0,
                block: None,
                key: MifareKey::DEFAULT,
                collision: false,
            }],
        };
        assert_eq!(scenario.card_at(u64::MAX - 11), None);
        assert_eq!(scenario.card_at(u64::MAX - 1), Some(0));
    }

    #[tokio::test]
    async fn test_collision_fails_select() {
        let clock = ManualClock::new(10);
        let scenario =
            Scenario::from_toml_str("[[presentation]]\nat_ms = 0\nuid = \"04a1223f\"\ncollision = true\n")
                .unwrap();
        let mut reader = SimulatedReader::new(scenario, clock);

        assert!(reader.is_new_card_present().await);
        assert_eq!(reader.read_card_serial().await.unwrap_err(), ReaderError::Collision);
        assert_eq!(reader.halt().await.unwrap_err(), ReaderError::NoSelection);
        assert!(reader.is_released());
    }

    #[tokio::test]
    async fn test_empty_field() {
        let clock = ManualClock::new(0);
        let mut reader = SimulatedReader::new(Scenario::from_toml_str(SCENARIO).unwrap(), clock);
        assert!(!reader.is_new_card_present().await);
        assert_eq!(reader.read_card_serial().await.unwrap_err(), ReaderError::Timeout);
    }
}
