//! Ledger state and bookkeeping
//!
//! `LedgerState` owns every counter and mapping of one escrow instance.
//! Guards (`require_role`, validation) run before any write, and the
//! `commit_*` methods only run once the matching payout has settled, so a
//! failed operation never leaves a partial mutation behind.
//!
//! Only [`crate::EscrowLedger`] may drive the mutating methods; outside the
//! crate the state is read-only:
//!
//! ```compile_fail
//! use escrow_ledger::{models::*, state::LedgerState};
//!
//! let config = LedgerConfig::new(
//!     Address::from_low_u64(2),
//!     Address::from_low_u64(3),
//!     Address::from_low_u64(1),
//! )
//! .unwrap();
//! let mut state = LedgerState::new(config, DEFAULT_PRICE).unwrap();
//! state.commit_cancel(&Address::from_low_u64(9), DEFAULT_PRICE);
//! ```

use crate::{
    error::EscrowError,
    models::{
        Address, Amount, EscrowEvent, LedgerConfig, LedgerEvent, LedgerSnapshot, Role, SaleId,
    },
    sale_id::{self, EntropySource, SaleIdInputs},
    EscrowResult,
};
use std::collections::HashMap;

/// Mutable state of one escrow instance
#[derive(Debug, Clone)]
pub struct LedgerState {
    config: LedgerConfig,
    price: Amount,
    /// Value currently in custody
    held_balance: Amount,
    /// Counter mixed into sale identifier hashes
    next_id: u64,
    deposits: HashMap<Address, Amount>,
    receipts: HashMap<Address, Vec<SaleId>>,
    events: Vec<EscrowEvent>,
}

impl LedgerState {
    pub fn new(config: LedgerConfig, price: Amount) -> EscrowResult<Self> {
        if price == 0 {
            return Err(EscrowError::InvalidPrice(price));
        }

        Ok(Self {
            config,
            price,
            held_balance: 0,
            next_id: 0,
            deposits: HashMap::new(),
            receipts: HashMap::new(),
            events: Vec::new(),
        })
    }

    pub fn config(&self) -> &LedgerConfig {
        &self.config
    }

    pub fn price(&self) -> Amount {
        self.price
    }

    pub fn held_balance(&self) -> Amount {
        self.held_balance
    }

    pub fn is_funded(&self) -> bool {
        self.held_balance > 0
    }

    pub fn next_id(&self) -> u64 {
        self.next_id
    }

    pub fn deposit_of(&self, buyer: &Address) -> Amount {
        self.deposits.get(buyer).copied().unwrap_or_default()
    }

    pub fn sale_ids_of(&self, buyer: &Address) -> &[SaleId] {
        self.receipts.get(buyer).map(Vec::as_slice).unwrap_or_default()
    }

    pub fn events(&self) -> &[EscrowEvent] {
        &self.events
    }

    /// Fail unless `caller` holds `role`
    pub fn require_role(&self, caller: &Address, role: Role) -> EscrowResult<()> {
        if *caller != self.config.address_of(role) {
            return Err(EscrowError::unauthorized(caller, role));
        }
        Ok(())
    }

    /// Owner-only price update; returns the previous price
    pub(crate) fn set_price(
        &mut self,
        caller: &Address,
        new_price: Amount,
    ) -> EscrowResult<Amount> {
        self.require_role(caller, Role::Owner)?;
        if new_price == 0 {
            return Err(EscrowError::InvalidPrice(new_price));
        }

        Ok(std::mem::replace(&mut self.price, new_price))
    }

    /// Take custody of exactly one price worth of value from `buyer`
    pub(crate) fn deposit(
        &mut self,
        buyer: &Address,
        amount_sent: Amount,
    ) -> EscrowResult<EscrowEvent> {
        if amount_sent != self.price {
            return Err(EscrowError::InvalidPaymentAmount {
                expected: self.price,
                sent: amount_sent,
            });
        }

        let deposited = self
            .deposit_of(buyer)
            .checked_add(amount_sent)
            .ok_or_else(|| EscrowError::internal(format!("deposit overflow for {}", buyer)))?;
        let held = self
            .held_balance
            .checked_add(amount_sent)
            .ok_or_else(|| EscrowError::internal("custody balance overflow"))?;

        self.deposits.insert(*buyer, deposited);
        self.held_balance = held;

        Ok(self.record(LedgerEvent::FundsDeposited {
            buyer: *buyer,
            amount: amount_sent,
        }))
    }

    /// Amount a release or cancel of `buyer` would pay out.
    ///
    /// Checks the agent guard, that a deposit is pending, and that custody
    /// covers it.
    pub(crate) fn pending_resolution(
        &self,
        caller: &Address,
        buyer: &Address,
    ) -> EscrowResult<Amount> {
        self.require_role(caller, Role::EscrowAgent)?;

        let amount = self.deposit_of(buyer);
        if amount == 0 {
            return Err(EscrowError::NoFundsDeposited(*buyer));
        }
        if self.held_balance < amount {
            return Err(EscrowError::transfer_failed(buyer, &self.config.seller));
        }
        Ok(amount)
    }

    /// Identifier the next release of `buyer` would record. Does not mutate.
    pub fn prepare_sale_id(
        &self,
        caller: &Address,
        buyer: &Address,
        entropy: &dyn EntropySource,
        max_attempts: u32,
    ) -> EscrowResult<SaleId> {
        let inputs = SaleIdInputs::sample(entropy, *caller, self.next_id);
        sale_id::generate(&inputs, self.sale_ids_of(buyer), max_attempts)
    }

    /// Book a settled release: returns `FundsReleased` then `NewSaleMade`
    pub(crate) fn commit_release(
        &mut self,
        buyer: &Address,
        amount: Amount,
        sale_id: SaleId,
    ) -> Vec<EscrowEvent> {
        self.settle(buyer, amount);
        self.receipts
            .entry(*buyer)
            .or_default()
            .push(sale_id.clone());
        self.next_id += 1;

        let seller = self.config.seller;
        vec![
            self.record(LedgerEvent::FundsReleased {
                buyer: *buyer,
                seller,
                amount,
            }),
            self.record(LedgerEvent::NewSaleMade {
                buyer: *buyer,
                seller,
                amount,
                sale_id,
            }),
        ]
    }

    /// Book a settled refund
    pub(crate) fn commit_cancel(&mut self, buyer: &Address, amount: Amount) -> EscrowEvent {
        self.settle(buyer, amount);
        self.record(LedgerEvent::TransactionCancelled {
            buyer: *buyer,
            amount,
        })
    }

    pub fn snapshot(&self) -> LedgerSnapshot {
        LedgerSnapshot {
            config: self.config,
            price: self.price,
            held_balance: self.held_balance,
            next_id: self.next_id,
            deposits: self.deposits.iter().map(|(k, v)| (*k, *v)).collect(),
            receipts: self
                .receipts
                .iter()
                .map(|(k, v)| (*k, v.clone()))
                .collect(),
        }
    }

    /// Custody covered `amount` when `pending_resolution` ran under the same lock
    fn settle(&mut self, buyer: &Address, amount: Amount) {
        self.held_balance -= amount;
        self.deposits.remove(buyer);
    }

    #[cfg(test)]
    pub(crate) fn insert_receipt(&mut self, buyer: &Address, sale_id: SaleId) {
        self.receipts.entry(*buyer).or_default().push(sale_id);
    }

    fn record(&mut self, event: LedgerEvent) -> EscrowEvent {
        let record = EscrowEvent::new(self.events.len() as u64, event);
        self.events.push(record.clone());
        record
    }
}
