//! Ledger settings
//!
//! Settings come from an optional file plus `ESCROW_LEDGER_*` environment
//! variables, layered with the `config` crate over the defaults below.

use crate::{
    error::EscrowError,
    models::{Amount, DEFAULT_PRICE},
    EscrowResult,
};
use serde::{Deserialize, Deserializer};
use std::path::Path;
use tracing::Level;

/// Upper bound on sale identifier attempts per release
pub const MAX_SALE_ID_ATTEMPTS: u32 = 10;

/// Environment variable prefix
pub const ENV_PREFIX: &str = "ESCROW_LEDGER";

/// Configuration for an escrow ledger instance
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LedgerSettings {
    /// Price a new ledger starts with, in the smallest unit
    #[serde(deserialize_with = "amount_from_u64")]
    pub default_price: Amount,
    /// Sale identifier attempts before giving up
    pub sale_id_max_attempts: u32,
    /// Log level for `telemetry::init_tracing`
    pub log_level: String,
}

impl Default for LedgerSettings {
    fn default() -> Self {
        Self {
            default_price: DEFAULT_PRICE, // 0.005 native units
            sale_id_max_attempts: MAX_SALE_ID_ATTEMPTS,
            log_level: "info".to_string(),
        }
    }
}

impl LedgerSettings {
    /// Load settings from `path` (if it exists) and the environment
    pub fn load(path: Option<&Path>) -> EscrowResult<Self> {
        let mut builder = ::config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(::config::File::from(path).required(false));
        }
        builder = builder.add_source(::config::Environment::with_prefix(ENV_PREFIX));

        let settings: Self = builder
            .build()
            .and_then(|raw| raw.try_deserialize())
            .map_err(|e| EscrowError::config(e.to_string()))?;

        settings.validate()?;
        Ok(settings)
    }

    /// Check value ranges
    pub fn validate(&self) -> EscrowResult<()> {
        if self.default_price == 0 {
            return Err(EscrowError::config("default_price must be greater than 0"));
        }
        if !(1..=MAX_SALE_ID_ATTEMPTS).contains(&self.sale_id_max_attempts) {
            return Err(EscrowError::config(format!(
                "sale_id_max_attempts must be between 1 and {}, got {}",
                MAX_SALE_ID_ATTEMPTS, self.sale_id_max_attempts
            )));
        }
        self.tracing_level()?;
        Ok(())
    }

    /// Parsed log level
    pub fn tracing_level(&self) -> EscrowResult<Level> {
        self.log_level
            .parse::<Level>()
            .map_err(|_| EscrowError::config(format!("unknown log level: {}", self.log_level)))
    }
}

/// File and environment sources carry at most 64-bit integers
fn amount_from_u64<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Amount, D::Error> {
    u64::deserialize(deserializer).map(Amount::from)
}
