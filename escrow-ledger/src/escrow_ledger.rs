//! Escrow Ledger - custody service for one seller and one escrow agent
//!
//! Buyers deposit the current price, the escrow agent either releases the
//! deposit to the seller (minting a sale identifier) or cancels it back to
//! the buyer. All state sits behind one `RwLock`; every mutating call holds
//! the write guard until it returns, payout included, so operations on an
//! instance never interleave.

use crate::{
    config::LedgerSettings,
    error::EscrowError,
    models::{Address, Amount, EscrowEvent, LedgerConfig, LedgerSnapshot, SaleId},
    payment_rail::PaymentRail,
    sale_id::{EntropySource, SystemEntropy},
    state::LedgerState,
    EscrowResult,
};
use std::sync::Arc;
use tokio::sync::{broadcast, RwLock};
use tracing::{info, warn};

/// Buffered events per subscriber before older ones are dropped
const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Escrow ledger service
pub struct EscrowLedger {
    /// Settings the ledger was built with
    settings: LedgerSettings,
    state: RwLock<LedgerState>,
    /// Payout primitive
    rail: Arc<dyn PaymentRail>,
    /// Clock and seed for sale identifiers
    entropy: Arc<dyn EntropySource>,
    events_tx: broadcast::Sender<EscrowEvent>,
}

impl EscrowLedger {
    /// Create a ledger with default settings and system entropy
    pub fn new(
        seller: Address,
        escrow_agent: Address,
        creator: Address,
        rail: Arc<dyn PaymentRail>,
    ) -> EscrowResult<Self> {
        Self::with_settings(
            LedgerSettings::default(),
            seller,
            escrow_agent,
            creator,
            rail,
            Arc::new(SystemEntropy),
        )
    }

    /// Create a ledger; `creator` becomes the owner
    pub fn with_settings(
        settings: LedgerSettings,
        seller: Address,
        escrow_agent: Address,
        creator: Address,
        rail: Arc<dyn PaymentRail>,
        entropy: Arc<dyn EntropySource>,
    ) -> EscrowResult<Self> {
        settings.validate()?;
        let config = LedgerConfig::new(seller, escrow_agent, creator)?;
        let state = LedgerState::new(config, settings.default_price)?;
        let (events_tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);

        info!(
            %seller,
            %escrow_agent,
            owner = %creator,
            price = settings.default_price,
            "Initialized escrow ledger"
        );

        Ok(Self {
            settings,
            state: RwLock::new(state),
            rail,
            entropy,
            events_tx,
        })
    }

    /// Owner-only price change
    pub async fn set_price(&self, caller: &Address, new_price: Amount) -> EscrowResult<()> {
        let mut state = self.state.write().await;
        let previous = state.set_price(caller, new_price).inspect_err(|e| {
            warn!(%caller, new_price, error = %e, "Price update refused");
        })?;

        info!(previous, new_price, "Price updated");
        Ok(())
    }

    /// Deposit exactly the current price on behalf of `caller`
    pub async fn deposit_funds(
        &self,
        caller: &Address,
        amount_sent: Amount,
    ) -> EscrowResult<EscrowEvent> {
        let mut state = self.state.write().await;
        let event = state.deposit(caller, amount_sent).inspect_err(|e| {
            warn!(buyer = %caller, amount_sent, error = %e, "Deposit refused");
        })?;

        info!(
            buyer = %caller,
            amount = amount_sent,
            total = state.deposit_of(caller),
            "Funds deposited"
        );
        self.publish(std::slice::from_ref(&event));

        Ok(event)
    }

    /// Release `buyer`'s deposit to the seller and mint a sale identifier.
    ///
    /// The identifier is generated before any value moves, so an exhausted
    /// generation leaves custody untouched.
    ///
    /// # Cancel safety
    ///
    /// Not cancel-safe across the payout: once the rail has moved value the
    /// booking must run, so callers must drive the future to completion. With
    /// a rail honouring the [`PaymentRail`] contract, no await point follows
    /// the moment value moves.
    pub async fn release_funds(&self, caller: &Address, buyer: &Address) -> EscrowResult<SaleId> {
        let mut state = self.state.write().await;
        let amount = state.pending_resolution(caller, buyer).inspect_err(|e| {
            warn!(%caller, %buyer, error = %e, "Release refused");
        })?;
        let seller = state.config().seller;

        let sale_id = state
            .prepare_sale_id(
                caller,
                buyer,
                self.entropy.as_ref(),
                self.settings.sale_id_max_attempts,
            )
            .inspect_err(|e| {
                warn!(%buyer, error = %e, "Sale identifier generation failed");
            })?;

        if let Err(e) = self.rail.transfer(&seller, amount).await {
            warn!(%buyer, %seller, amount, error = %e, "Release transfer rejected");
            return Err(EscrowError::transfer_failed(buyer, &seller));
        }

        let events = state.commit_release(buyer, amount, sale_id.clone());
        info!(%buyer, %seller, amount, sale_id = %sale_id, "Funds released, sale recorded");
        self.publish(&events);

        Ok(sale_id)
    }

    /// Refund `buyer`'s deposit
    ///
    /// Same cancel-safety contract as [`Self::release_funds`].
    pub async fn cancel_transaction(
        &self,
        caller: &Address,
        buyer: &Address,
    ) -> EscrowResult<EscrowEvent> {
        let mut state = self.state.write().await;
        let amount = state.pending_resolution(caller, buyer).inspect_err(|e| {
            warn!(%caller, %buyer, error = %e, "Cancel refused");
        })?;

        if let Err(e) = self.rail.transfer(buyer, amount).await {
            let seller = state.config().seller;
            warn!(%buyer, amount, error = %e, "Refund transfer rejected");
            return Err(EscrowError::transfer_failed(buyer, &seller));
        }

        let event = state.commit_cancel(buyer, amount);
        info!(%buyer, amount, "Transaction cancelled, buyer refunded");
        self.publish(std::slice::from_ref(&event));

        Ok(event)
    }

    pub async fn seller(&self) -> Address {
        self.state.read().await.config().seller
    }

    pub async fn escrow_agent(&self) -> Address {
        self.state.read().await.config().escrow_agent
    }

    pub async fn owner(&self) -> Address {
        self.state.read().await.config().owner
    }

    pub async fn price(&self) -> Amount {
        self.state.read().await.price()
    }

    /// Amount `buyer` has pending
    pub async fn deposit_of(&self, buyer: &Address) -> Amount {
        self.state.read().await.deposit_of(buyer)
    }

    /// Sale identifiers recorded for `buyer`, oldest first
    pub async fn sale_ids_of(&self, buyer: &Address) -> Vec<SaleId> {
        self.state.read().await.sale_ids_of(buyer).to_vec()
    }

    /// Value currently in custody
    pub async fn held_balance(&self) -> Amount {
        self.state.read().await.held_balance()
    }

    pub async fn is_funded(&self) -> bool {
        self.state.read().await.is_funded()
    }

    /// Audit log of every emitted event
    pub async fn events(&self) -> Vec<EscrowEvent> {
        self.state.read().await.events().to_vec()
    }

    /// Audit log as a JSON array
    pub async fn events_json(&self) -> EscrowResult<String> {
        let state = self.state.read().await;
        Ok(serde_json::to_string(state.events())?)
    }

    pub async fn snapshot(&self) -> LedgerSnapshot {
        self.state.read().await.snapshot()
    }

    /// Receive events emitted after this call
    pub fn subscribe(&self) -> broadcast::Receiver<EscrowEvent> {
        self.events_tx.subscribe()
    }

    fn publish(&self, events: &[EscrowEvent]) {
        for event in events {
            // Errs only when nobody is subscribed.
            let _ = self.events_tx.send(event.clone());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        models::{LedgerEvent, Role, DEFAULT_PRICE},
        payment_rail::InMemoryRail,
        sale_id::{derive_candidate, FixedEntropy, SaleIdInputs},
    };

    struct Fixture {
        ledger: EscrowLedger,
        rail: Arc<InMemoryRail>,
        owner: Address,
        seller: Address,
        agent: Address,
        buyer: Address,
    }

    fn fixture_with(settings: LedgerSettings, entropy: Arc<dyn EntropySource>) -> Fixture {
        let rail = Arc::new(InMemoryRail::new());
        let owner = Address::from_low_u64(1);
        let seller = Address::from_low_u64(2);
        let agent = Address::from_low_u64(3);
        let ledger =
            EscrowLedger::with_settings(settings, seller, agent, owner, rail.clone(), entropy)
                .unwrap();

        Fixture {
            ledger,
            rail,
            owner,
            seller,
            agent,
            buyer: Address::from_low_u64(100),
        }
    }

    fn fixture() -> Fixture {
        fixture_with(LedgerSettings::default(), Arc::new(SystemEntropy))
    }

    #[tokio::test]
    async fn test_construction_defaults() {
        let f = fixture();

        assert_eq!(f.ledger.seller().await, f.seller);
        assert_eq!(f.ledger.escrow_agent().await, f.agent);
        assert_eq!(f.ledger.owner().await, f.owner);
        assert_eq!(f.ledger.price().await, DEFAULT_PRICE);
        assert!(!f.ledger.is_funded().await);
        assert_eq!(f.ledger.snapshot().await.next_id, 0);
    }

    #[tokio::test]
    async fn test_construction_rejects_zero_addresses() {
        let rail: Arc<dyn PaymentRail> = Arc::new(InMemoryRail::new());
        let someone = Address::from_low_u64(4);

        let result = EscrowLedger::new(Address::ZERO, someone, someone, rail.clone());
        assert!(matches!(
            result,
            Err(EscrowError::InvalidAddress { role: Role::Seller, .. })
        ));

        let result = EscrowLedger::new(someone, Address::ZERO, someone, rail);
        assert!(matches!(
            result,
            Err(EscrowError::InvalidAddress { role: Role::EscrowAgent, .. })
        ));
    }

    #[tokio::test]
    async fn test_construction_rejects_invalid_settings() {
        let settings = LedgerSettings {
            sale_id_max_attempts: 0,
            ..LedgerSettings::default()
        };
        let rail: Arc<dyn PaymentRail> = Arc::new(InMemoryRail::new());
        let result = EscrowLedger::with_settings(
            settings,
            Address::from_low_u64(2),
            Address::from_low_u64(3),
            Address::from_low_u64(1),
            rail,
            Arc::new(SystemEntropy),
        );
        assert!(matches!(result, Err(EscrowError::Config(_))));
    }

    #[tokio::test]
    async fn test_release_pays_seller_and_records_sale() {
        let f = fixture();
        let mut events = f.ledger.subscribe();

        f.ledger.deposit_funds(&f.buyer, DEFAULT_PRICE).await.unwrap();
        let sale_id = f.ledger.release_funds(&f.agent, &f.buyer).await.unwrap();

        assert_eq!(f.rail.balance_of(&f.seller).await, DEFAULT_PRICE);
        assert_eq!(f.ledger.sale_ids_of(&f.buyer).await, vec![sale_id.clone()]);
        assert_eq!(f.ledger.held_balance().await, 0);
        assert_eq!(f.ledger.deposit_of(&f.buyer).await, 0);

        let names: Vec<&str> = [
            events.recv().await.unwrap(),
            events.recv().await.unwrap(),
            events.recv().await.unwrap(),
        ]
        .iter()
        .map(|e| e.event.name())
        .collect();
        assert_eq!(names, ["FundsDeposited", "FundsReleased", "NewSaleMade"]);

        let log = f.ledger.events().await;
        assert_eq!(
            log[2].event,
            LedgerEvent::NewSaleMade {
                buyer: f.buyer,
                seller: f.seller,
                amount: DEFAULT_PRICE,
                sale_id,
            }
        );
    }

    #[tokio::test]
    async fn test_non_agent_cannot_resolve() {
        let f = fixture();
        f.ledger.deposit_funds(&f.buyer, DEFAULT_PRICE).await.unwrap();

        for caller in [f.owner, f.seller, f.buyer] {
            assert!(matches!(
                f.ledger.release_funds(&caller, &f.buyer).await,
                Err(EscrowError::Unauthorized { .. })
            ));
            assert!(matches!(
                f.ledger.cancel_transaction(&caller, &f.buyer).await,
                Err(EscrowError::Unauthorized { .. })
            ));
        }

        assert_eq!(f.ledger.deposit_of(&f.buyer).await, DEFAULT_PRICE);
        assert_eq!(f.ledger.held_balance().await, DEFAULT_PRICE);
        assert!(f.ledger.sale_ids_of(&f.buyer).await.is_empty());
        assert!(f.rail.history().await.is_empty());
    }

    #[tokio::test]
    async fn test_second_resolution_without_deposit_fails_cleanly() {
        let f = fixture();
        f.ledger.deposit_funds(&f.buyer, DEFAULT_PRICE).await.unwrap();
        f.ledger.release_funds(&f.agent, &f.buyer).await.unwrap();

        assert!(matches!(
            f.ledger.release_funds(&f.agent, &f.buyer).await,
            Err(EscrowError::NoFundsDeposited(_))
        ));
        assert!(matches!(
            f.ledger.cancel_transaction(&f.agent, &f.buyer).await,
            Err(EscrowError::NoFundsDeposited(_))
        ));
        assert_eq!(f.rail.history().await.len(), 1);
    }

    #[tokio::test]
    async fn test_rejected_release_leaves_state_unchanged() {
        let f = fixture();
        f.ledger.deposit_funds(&f.buyer, DEFAULT_PRICE).await.unwrap();
        f.rail.reject_transfers_to(f.seller).await;
        let before = f.ledger.snapshot().await;

        let err = f.ledger.release_funds(&f.agent, &f.buyer).await.unwrap_err();
        assert!(matches!(
            err,
            EscrowError::TransferFailed { buyer, seller } if buyer == f.buyer && seller == f.seller
        ));

        let after = f.ledger.snapshot().await;
        assert_eq!(after.deposits, before.deposits);
        assert_eq!(after.held_balance, before.held_balance);
        assert_eq!(after.next_id, before.next_id);
        assert!(after.receipts.is_empty());
        assert_eq!(f.ledger.events().await.len(), 1);
    }

    #[tokio::test]
    async fn test_rejected_refund_leaves_state_unchanged() {
        let f = fixture();
        f.ledger.deposit_funds(&f.buyer, DEFAULT_PRICE).await.unwrap();
        f.rail.reject_transfers_to(f.buyer).await;

        let err = f.ledger.cancel_transaction(&f.agent, &f.buyer).await.unwrap_err();
        assert!(matches!(err, EscrowError::TransferFailed { .. }));
        assert_eq!(f.ledger.deposit_of(&f.buyer).await, DEFAULT_PRICE);
        assert_eq!(f.ledger.held_balance().await, DEFAULT_PRICE);

        f.rail.accept_transfers_to(&f.buyer).await;
        f.ledger.cancel_transaction(&f.agent, &f.buyer).await.unwrap();
        assert_eq!(f.rail.balance_of(&f.buyer).await, DEFAULT_PRICE);
    }

    #[tokio::test]
    async fn test_exhausted_generation_moves_no_value() {
        let entropy = FixedEntropy {
            timestamp: 1_700_000_000,
            seed: [9u8; 32],
        };
        let settings = LedgerSettings {
            sale_id_max_attempts: 1,
            ..LedgerSettings::default()
        };
        let f = fixture_with(settings, Arc::new(entropy));
        f.ledger.deposit_funds(&f.buyer, DEFAULT_PRICE).await.unwrap();

        let only_candidate = derive_candidate(&SaleIdInputs::sample(&entropy, f.agent, 0), 0);
        f.ledger
            .state
            .write()
            .await
            .insert_receipt(&f.buyer, only_candidate);

        let err = f.ledger.release_funds(&f.agent, &f.buyer).await.unwrap_err();
        assert!(matches!(err, EscrowError::SaleIdExhausted { attempts: 1 }));

        assert_eq!(f.rail.balance_of(&f.seller).await, 0);
        assert!(f.rail.history().await.is_empty());
        assert_eq!(f.ledger.deposit_of(&f.buyer).await, DEFAULT_PRICE);
        assert_eq!(f.ledger.held_balance().await, DEFAULT_PRICE);
        assert_eq!(f.ledger.sale_ids_of(&f.buyer).await.len(), 1);
        assert_eq!(f.ledger.snapshot().await.next_id, 0);
    }

    #[tokio::test]
    async fn test_fixed_entropy_yields_reproducible_sale_id() {
        let entropy = FixedEntropy {
            timestamp: 1_700_000_000,
            seed: [9u8; 32],
        };
        let f = fixture_with(LedgerSettings::default(), Arc::new(entropy));
        f.ledger.deposit_funds(&f.buyer, DEFAULT_PRICE).await.unwrap();

        let sale_id = f.ledger.release_funds(&f.agent, &f.buyer).await.unwrap();
        let expected = derive_candidate(&SaleIdInputs::sample(&entropy, f.agent, 0), 0);
        assert_eq!(sale_id, expected);
    }

    #[tokio::test]
    async fn test_events_json_export() {
        let f = fixture();
        f.ledger.deposit_funds(&f.buyer, DEFAULT_PRICE).await.unwrap();

        let json: serde_json::Value =
            serde_json::from_str(&f.ledger.events_json().await.unwrap()).unwrap();
        assert_eq!(json[0]["sequence"], 0);
        assert_eq!(json[0]["event"]["type"], "funds_deposited");
    }
}
