//! Error types for the escrow ledger
//!
//! Every ledger operation fails with one of these variants and leaves the
//! ledger untouched. Variants are grouped into the classes reported by
//! [`EscrowError::kind`].

use crate::models::{Address, Amount, Role};
use thiserror::Error;

/// Main error type for ledger operations
#[derive(Error, Debug)]
pub enum EscrowError {
    /// Caller does not hold the role the operation requires
    #[error("Unauthorized: {caller} is not the {required}")]
    Unauthorized { caller: Address, required: Role },

    /// A required account identity is the zero address
    #[error("Invalid address for {role}: {address}")]
    InvalidAddress { role: Role, address: Address },

    /// Price updates must be strictly positive
    #[error("Invalid price: {0}")]
    InvalidPrice(Amount),

    /// Deposits must match the current price exactly
    #[error("Invalid payment amount: expected {expected}, got {sent}")]
    InvalidPaymentAmount { expected: Amount, sent: Amount },

    /// Buyer has nothing pending for resolution
    #[error("No funds deposited for {0}")]
    NoFundsDeposited(Address),

    /// Value transfer was rejected or could not be covered by custody
    #[error("Transfer failed for buyer {buyer} (seller {seller})")]
    TransferFailed { buyer: Address, seller: Address },

    /// Every sale identifier candidate collided with an existing receipt
    #[error("Sale identifier generation exhausted after {attempts} attempts")]
    SaleIdExhausted { attempts: u32 },

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Serialization errors
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// General internal errors
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Broad class of an [`EscrowError`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Authorization,
    Validation,
    State,
    ExternalFailure,
    Exhaustion,
    Internal,
}

impl EscrowError {
    /// Create an authorization error
    pub fn unauthorized(caller: &Address, required: Role) -> Self {
        Self::Unauthorized {
            caller: *caller,
            required,
        }
    }

    /// Create a transfer failure
    pub fn transfer_failed(buyer: &Address, seller: &Address) -> Self {
        Self::TransferFailed {
            buyer: *buyer,
            seller: *seller,
        }
    }

    /// Create a configuration error
    pub fn config<S: Into<String>>(msg: S) -> Self {
        Self::Config(msg.into())
    }

    /// Create an internal error
    pub fn internal<S: Into<String>>(msg: S) -> Self {
        Self::Internal(msg.into())
    }

    /// Classify this error
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Unauthorized { .. } => ErrorKind::Authorization,
            Self::InvalidAddress { .. }
            | Self::InvalidPrice(_)
            | Self::InvalidPaymentAmount { .. }
            | Self::Config(_) => ErrorKind::Validation,
            Self::NoFundsDeposited(_) => ErrorKind::State,
            Self::TransferFailed { .. } => ErrorKind::ExternalFailure,
            Self::SaleIdExhausted { .. } => ErrorKind::Exhaustion,
            Self::Serialization(_) | Self::Internal(_) => ErrorKind::Internal,
        }
    }
}
