//! Payment Rail - Moves value out of ledger custody
//!
//! The ledger never assumes a transfer succeeds. Every payout goes through a
//! [`PaymentRail`] and a rejection fails the enclosing operation.
//! [`InMemoryRail`] is a simulated chain that keeps account balances and can
//! be told to refuse payments to specific recipients.

use crate::models::{Address, Amount};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::{info, warn};
use uuid::Uuid;

/// Reasons a rail refuses a transfer
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RailError {
    /// Recipient refused the payment
    #[error("recipient {0} rejected the transfer")]
    Rejected(Address),

    /// Crediting the recipient would overflow its balance
    #[error("balance overflow crediting {0}")]
    Overflow(Address),
}

/// Completed transfer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferReceipt {
    pub transfer_id: Uuid,
    pub recipient: Address,
    pub amount: Amount,
    pub settled_at: DateTime<Utc>,
}

/// Value-transfer primitive of the hosting environment
///
/// The ledger awaits `transfer` while holding its write lock and books the
/// payout only after it returns `Ok`. If value has moved, the returned future
/// must already be complete; an implementation must not await anything
/// between committing the payment and returning the receipt.
#[async_trait]
pub trait PaymentRail: Send + Sync {
    /// Pay `amount` to `recipient`
    async fn transfer(
        &self,
        recipient: &Address,
        amount: Amount,
    ) -> Result<TransferReceipt, RailError>;
}

#[derive(Debug, Default)]
struct RailBook {
    balances: HashMap<Address, Amount>,
    rejecting: HashSet<Address>,
    history: Vec<TransferReceipt>,
}

/// Simulated chain holding account balances in memory
#[derive(Debug, Default)]
pub struct InMemoryRail {
    book: RwLock<RailBook>,
}

impl InMemoryRail {
    pub fn new() -> Self {
        Self::default()
    }

    /// Refuse every future transfer to `recipient`
    pub async fn reject_transfers_to(&self, recipient: Address) {
        self.book.write().await.rejecting.insert(recipient);
    }

    /// Undo [`Self::reject_transfers_to`]
    pub async fn accept_transfers_to(&self, recipient: &Address) {
        self.book.write().await.rejecting.remove(recipient);
    }

    /// Balance credited to `account` so far
    pub async fn balance_of(&self, account: &Address) -> Amount {
        self.book
            .read()
            .await
            .balances
            .get(account)
            .copied()
            .unwrap_or_default()
    }

    /// Every successful transfer, oldest first
    pub async fn history(&self) -> Vec<TransferReceipt> {
        self.book.read().await.history.clone()
    }
}

#[async_trait]
impl PaymentRail for InMemoryRail {
    async fn transfer(
        &self,
        recipient: &Address,
        amount: Amount,
    ) -> Result<TransferReceipt, RailError> {
        // Only await point; crediting and recording happen under one guard.
        let mut book = self.book.write().await;

        if book.rejecting.contains(recipient) {
            warn!(%recipient, amount, "Simulated rail rejected transfer");
            return Err(RailError::Rejected(*recipient));
        }

        let balance = book.balances.entry(*recipient).or_default();
        *balance = balance
            .checked_add(amount)
            .ok_or(RailError::Overflow(*recipient))?;

        let receipt = TransferReceipt {
            transfer_id: Uuid::new_v4(),
            recipient: *recipient,
            amount,
            settled_at: Utc::now(),
        };
        book.history.push(receipt.clone());

        info!(%recipient, amount, transfer_id = %receipt.transfer_id, "Transfer settled");

        Ok(receipt)
    }
}
