//! Core data models for the escrow ledger
//!
//! Account identities, amounts, roles, sale identifiers and the events
//! emitted on every successful state transition.

use crate::{error::EscrowError, EscrowResult};
use chrono::{DateTime, Utc};
use serde::{de, Deserialize, Deserializer, Serialize, Serializer};
use std::{collections::BTreeMap, fmt, str::FromStr};
use thiserror::Error;
use uuid::Uuid;

/// Value in the smallest currency unit
pub type Amount = u128;

/// One whole unit of the native currency
pub const NATIVE_UNIT: Amount = 1_000_000_000_000_000_000;

/// Price a fresh ledger starts with (0.005 native units)
pub const DEFAULT_PRICE: Amount = NATIVE_UNIT / 200;

/// 20-byte account identity
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Address([u8; 20]);

/// Address parsing errors
#[derive(Error, Debug, PartialEq, Eq)]
pub enum AddressParseError {
    #[error("address must start with 0x")]
    MissingPrefix,
    #[error("address must have 40 hex digits, got {0}")]
    Length(usize),
    #[error("invalid hex digit in address")]
    InvalidHex,
}

impl Address {
    /// The null identity
    pub const ZERO: Address = Address([0u8; 20]);

    pub const fn new(bytes: [u8; 20]) -> Self {
        Self(bytes)
    }

    /// Build an address whose last eight bytes hold `value`
    pub fn from_low_u64(value: u64) -> Self {
        let mut bytes = [0u8; 20];
        bytes[12..].copy_from_slice(&value.to_be_bytes());
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 20] {
        &self.0
    }

    pub fn is_zero(&self) -> bool {
        self.0 == [0u8; 20]
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("0x")?;
        for byte in self.0 {
            write!(f, "{:02x}", byte)?;
        }
        Ok(())
    }
}

impl fmt::Debug for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Address({})", self)
    }
}

impl FromStr for Address {
    type Err = AddressParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let hex = s
            .strip_prefix("0x")
            .or_else(|| s.strip_prefix("0X"))
            .ok_or(AddressParseError::MissingPrefix)?;
        if hex.len() != 40 {
            return Err(AddressParseError::Length(hex.len()));
        }

        let mut bytes = [0u8; 20];
        for (i, byte) in bytes.iter_mut().enumerate() {
            let pair = hex
                .get(i * 2..i * 2 + 2)
                .filter(|pair| pair.bytes().all(|b| b.is_ascii_hexdigit()))
                .ok_or(AddressParseError::InvalidHex)?;
            *byte = u8::from_str_radix(pair, 16).map_err(|_| AddressParseError::InvalidHex)?;
        }
        Ok(Self(bytes))
    }
}

impl Serialize for Address {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Address {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(de::Error::custom)
    }
}

/// Roles recognised by the ledger's access guards
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    /// May change the price
    Owner,
    /// Receives released funds
    Seller,
    /// Resolves deposits by release or cancel
    EscrowAgent,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Role::Owner => "owner",
            Role::Seller => "seller",
            Role::EscrowAgent => "escrow agent",
        })
    }
}

/// Identities fixed at construction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerConfig {
    pub seller: Address,
    pub escrow_agent: Address,
    pub owner: Address,
}

impl LedgerConfig {
    /// Validate the two required identities; the creator becomes owner
    pub fn new(seller: Address, escrow_agent: Address, creator: Address) -> EscrowResult<Self> {
        if seller.is_zero() {
            return Err(EscrowError::InvalidAddress {
                role: Role::Seller,
                address: seller,
            });
        }
        if escrow_agent.is_zero() {
            return Err(EscrowError::InvalidAddress {
                role: Role::EscrowAgent,
                address: escrow_agent,
            });
        }

        Ok(Self {
            seller,
            escrow_agent,
            owner: creator,
        })
    }

    /// Address bound to a role
    pub fn address_of(&self, role: Role) -> Address {
        match role {
            Role::Owner => self.owner,
            Role::Seller => self.seller,
            Role::EscrowAgent => self.escrow_agent,
        }
    }
}

/// Sale receipt identifier: 15 symbols over `[A-Z0-9]`
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct SaleId(String);

impl SaleId {
    /// Number of symbols in every identifier
    pub const LENGTH: usize = 15;

    /// Symbol alphabet
    pub const ALPHABET: &'static [u8; 36] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";

    /// Accepts only well-formed identifiers
    pub fn parse(raw: &str) -> Option<Self> {
        let well_formed = raw.len() == Self::LENGTH
            && raw.bytes().all(|b| Self::ALPHABET.contains(&b));
        well_formed.then(|| Self(raw.to_string()))
    }

    /// Caller guarantees `symbols` is well formed
    pub(crate) fn from_symbols(symbols: String) -> Self {
        debug_assert!(Self::parse(&symbols).is_some());
        Self(symbols)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SaleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for SaleId {
    type Error = String;

    fn try_from(raw: String) -> Result<Self, Self::Error> {
        Self::parse(&raw).ok_or_else(|| format!("malformed sale id: {raw}"))
    }
}

impl From<SaleId> for String {
    fn from(id: SaleId) -> Self {
        id.0
    }
}

/// Observable ledger events
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum LedgerEvent {
    FundsDeposited {
        buyer: Address,
        amount: Amount,
    },
    FundsReleased {
        buyer: Address,
        seller: Address,
        amount: Amount,
    },
    NewSaleMade {
        buyer: Address,
        seller: Address,
        amount: Amount,
        sale_id: SaleId,
    },
    TransactionCancelled {
        buyer: Address,
        amount: Amount,
    },
}

impl LedgerEvent {
    /// Short event name used in logs
    pub fn name(&self) -> &'static str {
        match self {
            Self::FundsDeposited { .. } => "FundsDeposited",
            Self::FundsReleased { .. } => "FundsReleased",
            Self::NewSaleMade { .. } => "NewSaleMade",
            Self::TransactionCancelled { .. } => "TransactionCancelled",
        }
    }
}

/// Escrow event for audit trail
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EscrowEvent {
    pub id: Uuid,
    /// Position in the ledger's event log, starting at 0
    pub sequence: u64,
    pub event: LedgerEvent,
    pub created_at: DateTime<Utc>,
}

impl EscrowEvent {
    pub fn new(sequence: u64, event: LedgerEvent) -> Self {
        Self {
            id: Uuid::new_v4(),
            sequence,
            event,
            created_at: Utc::now(),
        }
    }
}

/// Point-in-time view of the whole ledger
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedgerSnapshot {
    pub config: LedgerConfig,
    pub price: Amount,
    pub held_balance: Amount,
    pub next_id: u64,
    pub deposits: BTreeMap<Address, Amount>,
    pub receipts: BTreeMap<Address, Vec<SaleId>>,
}
