//! Three-party escrow ledger
//!
//! A buyer deposits a fixed price, a trusted escrow agent either releases
//! the deposit to the seller (recording a unique sale identifier for the
//! buyer) or cancels it back to the buyer. This crate provides:
//! - [`EscrowLedger`], the async custody service
//! - a pluggable [`payment_rail::PaymentRail`] for payouts
//! - deterministic, injectable sale identifier generation
//! - settings via the `config` crate and `tracing` instrumentation

pub mod config;
pub mod error;
pub mod escrow_ledger;
pub mod models;
pub mod payment_rail;
pub mod sale_id;
pub mod state;
pub mod telemetry;

pub use error::{ErrorKind, EscrowError};
pub use escrow_ledger::EscrowLedger;

/// Result type alias for escrow operations
pub type EscrowResult<T> = Result<T, EscrowError>;
