//! Sale identifier generation
//!
//! Identifiers are derived from SHA-256 over explicit inputs so a given set
//! of inputs always yields the same identifier. Entropy (clock and seed) is
//! injected through [`EntropySource`].

use crate::{
    error::EscrowError,
    models::{Address, SaleId},
    EscrowResult,
};
use bitcoin::hashes::{sha256, Hash, HashEngine};
use chrono::Utc;
use tracing::debug;
use uuid::Uuid;

/// Source of the non-deterministic inputs to identifier generation
pub trait EntropySource: Send + Sync {
    /// Current time in seconds since the Unix epoch
    fn timestamp(&self) -> i64;

    /// 32 bytes of low-predictability data
    fn seed(&self) -> [u8; 32];
}

/// Wall clock plus random v4 UUIDs
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemEntropy;

impl EntropySource for SystemEntropy {
    fn timestamp(&self) -> i64 {
        Utc::now().timestamp()
    }

    fn seed(&self) -> [u8; 32] {
        let mut seed = [0u8; 32];
        seed[..16].copy_from_slice(Uuid::new_v4().as_bytes());
        seed[16..].copy_from_slice(Uuid::new_v4().as_bytes());
        seed
    }
}

/// Constant entropy, for reproducible identifiers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FixedEntropy {
    pub timestamp: i64,
    pub seed: [u8; 32],
}

impl EntropySource for FixedEntropy {
    fn timestamp(&self) -> i64 {
        self.timestamp
    }

    fn seed(&self) -> [u8; 32] {
        self.seed
    }
}

/// Inputs shared by every attempt of one generation
#[derive(Debug, Clone, Copy)]
pub struct SaleIdInputs {
    pub timestamp: i64,
    pub seed: [u8; 32],
    pub caller: Address,
    /// Ledger's next-id counter
    pub nonce: u64,
}

impl SaleIdInputs {
    /// Sample entropy for one generation
    pub fn sample(entropy: &dyn EntropySource, caller: Address, nonce: u64) -> Self {
        Self {
            timestamp: entropy.timestamp(),
            seed: entropy.seed(),
            caller,
            nonce,
        }
    }
}

/// Candidate identifier for one attempt
pub fn derive_candidate(inputs: &SaleIdInputs, attempt: u32) -> SaleId {
    let mut engine = sha256::Hash::engine();
    engine.input(&inputs.timestamp.to_be_bytes());
    engine.input(&inputs.seed);
    engine.input(inputs.caller.as_bytes());
    engine.input(&inputs.nonce.to_be_bytes());
    engine.input(&attempt.to_be_bytes());
    let digest = sha256::Hash::from_engine(engine).to_byte_array();

    let symbols: String = (0..SaleId::LENGTH)
        .map(|i| {
            let byte = digest[i % digest.len()];
            SaleId::ALPHABET[byte as usize % SaleId::ALPHABET.len()] as char
        })
        .collect();

    SaleId::from_symbols(symbols)
}

/// First candidate not present in `existing`, trying at most `max_attempts`
pub fn generate(
    inputs: &SaleIdInputs,
    existing: &[SaleId],
    max_attempts: u32,
) -> EscrowResult<SaleId> {
    for attempt in 0..max_attempts {
        let candidate = derive_candidate(inputs, attempt);
        if !existing.contains(&candidate) {
            return Ok(candidate);
        }
        debug!(attempt, candidate = %candidate, "sale id collision, retrying");
    }

    Err(EscrowError::SaleIdExhausted {
        attempts: max_attempts,
    })
}
