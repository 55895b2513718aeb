//! Randomness client protocol
//!
//! Two phases: `request_randomness` hands the oracle a request and gets back a
//! [`RequestId`]; later the oracle calls
//! [`Raffle::fulfill_random_words`](crate::raffle::Raffle::fulfill_random_words)
//! with the same id. Nothing here waits for the fulfillment.

use crate::config::{OracleConfig, NUM_WORDS};
use crate::errors::{DrawError, OracleError};
use crate::types::RequestId;
use serde::{Deserialize, Serialize};
use std::fmt;

/// 256-bit random value delivered by the oracle (big-endian)
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RandomWord(#[serde(with = "hex_bytes")] [u8; 32]);

impl RandomWord {
    pub const fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// `self mod modulus` over the full 256-bit value. `modulus` must be non-zero.
    pub fn modulo(&self, modulus: u64) -> u64 {
        let m = modulus as u128;
        let rem = self
            .0
            .iter()
            .fold(0u128, |acc, &byte| ((acc << 8) | byte as u128) % m);
        rem as u64
    }
}

impl From<u64> for RandomWord {
    fn from(value: u64) -> Self {
        let mut bytes = [0u8; 32];
        bytes[24..].copy_from_slice(&value.to_be_bytes());
        Self(bytes)
    }
}

impl fmt::Debug for RandomWord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "RandomWord(0x{})", hex::encode(self.0))
    }
}

impl fmt::Display for RandomWord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{}", hex::encode(self.0))
    }
}

mod hex_bytes {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8; 32], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&format!("0x{}", hex::encode(bytes)))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<[u8; 32], D::Error> {
        let s = String::deserialize(deserializer)?;
        let decoded = hex::decode(s.trim_start_matches("0x")).map_err(serde::de::Error::custom)?;
        decoded
            .try_into()
            .map_err(|_| serde::de::Error::custom("random word must be 32 bytes"))
    }
}

/// Parameters sent with every randomness request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RandomnessRequest {
    pub key_hash: String,
    pub subscription_id: u64,
    pub request_confirmations: u16,
    pub callback_gas_limit: u32,
    pub num_words: u32,
}

impl From<&OracleConfig> for RandomnessRequest {
    fn from(config: &OracleConfig) -> Self {
        Self {
            key_hash: config.key_hash.clone(),
            subscription_id: config.subscription_id,
            request_confirmations: config.request_confirmations,
            callback_gas_limit: config.callback_gas_limit,
            num_words: NUM_WORDS,
        }
    }
}

/// Oracle collaborator as seen by the raffle.
///
/// Contract: every id returned is fresh, and exactly one fulfillment for it
/// eventually arrives through the raffle's fulfillment entry point.
pub trait RandomnessOracle: Send {
    fn request_randomness(&mut self, request: &RandomnessRequest) -> Result<RequestId, OracleError>;
}

/// Map a random word onto a participant index.
pub fn winner_index(word: &RandomWord, participant_count: usize) -> Result<usize, DrawError> {
    if participant_count == 0 {
        return Err(DrawError::InvariantViolation(
            "winner selection with zero participants".to_string(),
        ));
    }
    Ok(word.modulo(participant_count as u64) as usize)
}
