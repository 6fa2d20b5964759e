//! Error types for the ledger engine

use crate::access::Capability;
use serde::Serialize;
use thiserror::Error;
use unitvault_types::{Address, Amount, BatchId, Timestamp, UnitId};

/// Errors surfaced by the ledger engine.
///
/// Every error aborts the critical section that produced it; no state or
/// token movement from that section is committed.
#[derive(Debug, Clone, Error)]
pub enum LedgerError {
    #[error("unauthorized: {caller} lacks capability {required:?}")]
    Unauthorized {
        caller: Address,
        required: Capability,
    },

    #[error("unauthorized: {caller} does not own {entity} {id}")]
    NotOwner {
        caller: Address,
        entity: &'static str,
        id: u64,
    },

    #[error("{entity} {id} is {state}; operation not allowed")]
    WrongState {
        entity: &'static str,
        id: u64,
        state: String,
    },

    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: u64 },

    #[error("batch capacity exceeds max supply: requested={requested}, remaining={remaining}")]
    SupplyExceeded { requested: u32, remaining: u32 },

    #[error("all {max_supply} units have been issued")]
    SupplyExhausted { max_supply: u32 },

    #[error("mint allowance exceeded: requested={requested}, remaining={remaining}")]
    AllowanceExceeded { requested: Amount, remaining: Amount },

    #[error("invalid amount: {0}")]
    InvalidAmount(&'static str),

    #[error("insufficient funds: {0}")]
    InsufficientFunds(String),

    #[error("token transfer rejected: {0}")]
    TransferFailed(String),

    #[error("termination cooldown not elapsed: ready at {ready_at}, now {now}")]
    CooldownNotElapsed { ready_at: Timestamp, now: Timestamp },

    #[error("nothing to withdraw for unit {0}")]
    NothingToWithdraw(UnitId),

    #[error("nothing to release")]
    NothingToRelease,

    #[error("{0} is not whitelisted")]
    NotWhitelisted(Address),

    #[error("batch {0} is sold out")]
    BatchSoldOut(BatchId),

    #[error("no batch is active")]
    NoActiveBatch,

    #[error("unit transfers are disabled")]
    TransfersDisabled,

    #[error("genesis time is not set")]
    GenesisNotSet,

    #[error("invalid parameter: {0}")]
    InvalidParameter(String),

    #[error("arithmetic overflow in {0}")]
    ArithmeticOverflow(&'static str),

    #[error("configuration error: {0}")]
    Config(String),
}

/// Coarse error classification exposed to operator-facing layers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Unauthorized,
    WrongState,
    NotFound,
    SupplyExceeded,
    SupplyExhausted,
    AllowanceExceeded,
    InvalidAmount,
    InsufficientFunds,
    CooldownNotElapsed,
    NothingToWithdraw,
    NothingToRelease,
    NotWhitelisted,
    BatchSoldOut,
    InvalidParameter,
    Internal,
}

impl LedgerError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            LedgerError::Unauthorized { .. } | LedgerError::NotOwner { .. } => {
                ErrorKind::Unauthorized
            }
            LedgerError::WrongState { .. }
            | LedgerError::NoActiveBatch
            | LedgerError::TransfersDisabled
            | LedgerError::GenesisNotSet => ErrorKind::WrongState,
            LedgerError::NotFound { .. } => ErrorKind::NotFound,
            LedgerError::SupplyExceeded { .. } => ErrorKind::SupplyExceeded,
            LedgerError::SupplyExhausted { .. } => ErrorKind::SupplyExhausted,
            LedgerError::AllowanceExceeded { .. } => ErrorKind::AllowanceExceeded,
            LedgerError::InvalidAmount(_) => ErrorKind::InvalidAmount,
            LedgerError::InsufficientFunds(_) | LedgerError::TransferFailed(_) => {
                ErrorKind::InsufficientFunds
            }
            LedgerError::CooldownNotElapsed { .. } => ErrorKind::CooldownNotElapsed,
            LedgerError::NothingToWithdraw(_) => ErrorKind::NothingToWithdraw,
            LedgerError::NothingToRelease => ErrorKind::NothingToRelease,
            LedgerError::NotWhitelisted(_) => ErrorKind::NotWhitelisted,
            LedgerError::BatchSoldOut(_) => ErrorKind::BatchSoldOut,
            LedgerError::InvalidParameter(_) | LedgerError::Config(_) => {
                ErrorKind::InvalidParameter
            }
            LedgerError::ArithmeticOverflow(_) => ErrorKind::Internal,
        }
    }

    /// Expected, routine outcomes that callers may short-circuit on.
    pub fn is_routine(&self) -> bool {
        matches!(
            self,
            LedgerError::NothingToWithdraw(_) | LedgerError::NothingToRelease
        )
    }

    pub(crate) fn not_found(entity: &'static str, id: impl Into<u64>) -> Self {
        LedgerError::NotFound {
            entity,
            id: id.into(),
        }
    }

    pub(crate) fn wrong_state(
        entity: &'static str,
        id: impl Into<u64>,
        state: impl std::fmt::Debug,
    ) -> Self {
        LedgerError::WrongState {
            entity,
            id: id.into(),
            state: format!("{state:?}"),
        }
    }
}

/// Result type for ledger operations
pub type Result<T> = std::result::Result<T, LedgerError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_routine_errors() {
        assert!(LedgerError::NothingToRelease.is_routine());
        assert!(LedgerError::NothingToWithdraw(3).is_routine());
        assert!(!LedgerError::NoActiveBatch.is_routine());
    }

    #[test]
    fn test_kind_mapping() {
        let err = LedgerError::NotOwner {
            caller: Address::derive("mallory"),
            entity: "unit",
            id: 1,
        };
        assert_eq!(err.kind(), ErrorKind::Unauthorized);
        assert_eq!(
            LedgerError::TransferFailed("down".into()).kind(),
            ErrorKind::InsufficientFunds
        );
        assert_eq!(LedgerError::GenesisNotSet.kind(), ErrorKind::WrongState);
    }
}
