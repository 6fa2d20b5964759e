//! All-or-nothing units of work
//!
//! A [`Transaction`] carries a private copy of the committed state plus the
//! token movements queued so far. The engine publishes the copy only after
//! the operation body succeeded and the token collaborator accepted the whole
//! batch; any error on the way drops both.

use crate::state::LedgerState;
use crate::token_ledger::{TransferBatch, TransferReceipt};
use serde::{Deserialize, Serialize};
use unitvault_types::{Address, Timestamp};

pub struct Transaction {
    pub state: LedgerState,
    pub transfers: TransferBatch,
    pub caller: Address,
    /// Single time reading for the whole critical section.
    pub now: Timestamp,
}

impl Transaction {
    pub fn new(state: LedgerState, caller: Address, now: Timestamp) -> Self {
        Self {
            state,
            transfers: TransferBatch::new(),
            caller,
            now,
        }
    }
}

/// A committed operation's result together with its audit reference.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Committed<T> {
    pub value: T,
    /// Operation name, e.g. `"issue"`.
    pub operation: String,
    pub sequence: u64,
    /// Hex digest binding the operation, its sequence and the token receipt.
    pub reference: String,
    pub receipt: Option<TransferReceipt>,
}

impl<T> Committed<T> {
    pub fn new(value: T, operation: &str, sequence: u64, receipt: Option<TransferReceipt>) -> Self {
        let mut hasher = blake3::Hasher::new();
        hasher.update(operation.as_bytes());
        hasher.update(&sequence.to_le_bytes());
        if let Some(receipt) = &receipt {
            hasher.update(receipt.reference.as_bytes());
        }
        Self {
            value,
            operation: operation.to_string(),
            sequence,
            reference: hex::encode(hasher.finalize().as_bytes()),
            receipt,
        }
    }
}
