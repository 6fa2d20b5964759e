//! Fungible token collaborator
//!
//! The engine never keeps token balances itself. Every token movement an
//! operation implies is queued into a [`TransferBatch`] and handed to a
//! [`TokenLedger`] in one call, which applies the whole batch or nothing.

use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use thiserror::Error;
use unitvault_types::{Address, Amount, TokenId};

use crate::errors::LedgerError;

/// Errors raised by the token collaborator.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TokenError {
    #[error("insufficient {token} balance for {who}: needed {needed}, available {available}")]
    InsufficientBalance {
        token: TokenId,
        who: Address,
        needed: Amount,
        available: Amount,
    },

    #[error("insufficient {token} allowance from {owner} to {spender}: needed {needed}, approved {approved}")]
    InsufficientAllowance {
        token: TokenId,
        owner: Address,
        spender: Address,
        needed: Amount,
        approved: Amount,
    },

    #[error("{token} supply overflow")]
    Overflow { token: TokenId },

    #[error("transfer rejected: {0}")]
    Rejected(String),
}

impl From<TokenError> for LedgerError {
    fn from(err: TokenError) -> Self {
        match err {
            TokenError::Rejected(reason) => LedgerError::TransferFailed(reason),
            other => LedgerError::InsufficientFunds(other.to_string()),
        }
    }
}

/// A single token movement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TokenOp {
    /// Move from an account the engine controls.
    Transfer {
        token: TokenId,
        from: Address,
        to: Address,
        amount: Amount,
    },
    /// Move from `owner`, consuming `owner`'s allowance to `spender`.
    TransferFrom {
        token: TokenId,
        owner: Address,
        spender: Address,
        to: Address,
        amount: Amount,
    },
    /// Create new supply.
    Mint {
        token: TokenId,
        to: Address,
        amount: Amount,
    },
}

impl TokenOp {
    fn encode_into(&self, hasher: &mut blake3::Hasher) {
        match self {
            TokenOp::Transfer {
                token,
                from,
                to,
                amount,
            } => {
                hasher.update(&[0]);
                hasher.update(token.as_str().as_bytes());
                hasher.update(from.as_bytes());
                hasher.update(to.as_bytes());
                hasher.update(&amount.to_le_bytes());
            }
            TokenOp::TransferFrom {
                token,
                owner,
                spender,
                to,
                amount,
            } => {
                hasher.update(&[1]);
                hasher.update(token.as_str().as_bytes());
                hasher.update(owner.as_bytes());
                hasher.update(spender.as_bytes());
                hasher.update(to.as_bytes());
                hasher.update(&amount.to_le_bytes());
            }
            TokenOp::Mint { token, to, amount } => {
                hasher.update(&[2]);
                hasher.update(token.as_str().as_bytes());
                hasher.update(to.as_bytes());
                hasher.update(&amount.to_le_bytes());
            }
        }
    }
}

/// Ordered list of token movements applied atomically.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferBatch {
    pub ops: Vec<TokenOp>,
}

impl TransferBatch {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a transfer; zero amounts are dropped.
    pub fn push_transfer(&mut self, token: &TokenId, from: Address, to: Address, amount: Amount) {
        if amount > 0 {
            self.ops.push(TokenOp::Transfer {
                token: token.clone(),
                from,
                to,
                amount,
            });
        }
    }

    pub fn push_transfer_from(
        &mut self,
        token: &TokenId,
        owner: Address,
        spender: Address,
        to: Address,
        amount: Amount,
    ) {
        if amount > 0 {
            self.ops.push(TokenOp::TransferFrom {
                token: token.clone(),
                owner,
                spender,
                to,
                amount,
            });
        }
    }

    pub fn push_mint(&mut self, token: &TokenId, to: Address, amount: Amount) {
        if amount > 0 {
            self.ops.push(TokenOp::Mint {
                token: token.clone(),
                to,
                amount,
            });
        }
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }

    /// Deterministic digest of the batch contents.
    pub fn fingerprint(&self) -> blake3::Hash {
        let mut hasher = blake3::Hasher::new();
        for op in &self.ops {
            op.encode_into(&mut hasher);
        }
        hasher.finalize()
    }
}

/// Proof that a batch was applied.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferReceipt {
    /// Hex digest of the batch fingerprint and the ledger sequence number.
    pub reference: String,
    pub sequence: u64,
    pub ops: usize,
}

impl TransferReceipt {
    pub fn for_batch(batch: &TransferBatch, sequence: u64) -> Self {
        let mut hasher = blake3::Hasher::new();
        hasher.update(batch.fingerprint().as_bytes());
        hasher.update(&sequence.to_le_bytes());
        Self {
            reference: hex::encode(hasher.finalize().as_bytes()),
            sequence,
            ops: batch.len(),
        }
    }
}

/// Interface to the external fungible token component.
pub trait TokenLedger: Send + Sync {
    fn balance_of(&self, token: &TokenId, who: &Address) -> Amount;

    fn allowance(&self, token: &TokenId, owner: &Address, spender: &Address) -> Amount;

    /// Set `owner`'s allowance to `spender`, replacing any previous value.
    fn approve(
        &self,
        token: &TokenId,
        owner: Address,
        spender: Address,
        amount: Amount,
    ) -> Result<(), TokenError>;

    /// Apply every op in `batch`, or none of them.
    fn execute(&self, batch: &TransferBatch) -> Result<TransferReceipt, TokenError>;
}

// -----------------------------------------------------------------------------
// In-memory implementation
// -----------------------------------------------------------------------------

#[derive(Debug, Clone, Default)]
struct TokenBook {
    balances: HashMap<Address, Amount>,
    allowances: HashMap<(Address, Address), Amount>,
    total_supply: Amount,
    burned: Amount,
}

impl TokenBook {
    fn debit(&mut self, token: &TokenId, who: Address, amount: Amount) -> Result<(), TokenError> {
        let available = self.balances.get(&who).copied().unwrap_or(0);
        if available < amount {
            return Err(TokenError::InsufficientBalance {
                token: token.clone(),
                who,
                needed: amount,
                available,
            });
        }
        self.balances.insert(who, available - amount);
        Ok(())
    }

    fn credit(&mut self, token: &TokenId, who: Address, amount: Amount) -> Result<(), TokenError> {
        let entry = self.balances.entry(who).or_insert(0);
        *entry = entry.checked_add(amount).ok_or(TokenError::Overflow {
            token: token.clone(),
        })?;
        Ok(())
    }
}

#[derive(Debug, Default)]
struct Books {
    tokens: HashMap<TokenId, TokenBook>,
    sequence: u64,
}

impl Books {
    fn apply(&mut self, op: &TokenOp) -> Result<(), TokenError> {
        match op {
            TokenOp::Transfer {
                token,
                from,
                to,
                amount,
            } => {
                let book = self.tokens.entry(token.clone()).or_default();
                book.debit(token, *from, *amount)?;
                book.credit(token, *to, *amount)
            }
            TokenOp::TransferFrom {
                token,
                owner,
                spender,
                to,
                amount,
            } => {
                let book = self.tokens.entry(token.clone()).or_default();
                let key = (*owner, *spender);
                let approved = book.allowances.get(&key).copied().unwrap_or(0);
                if approved < *amount {
                    return Err(TokenError::InsufficientAllowance {
                        token: token.clone(),
                        owner: *owner,
                        spender: *spender,
                        needed: *amount,
                        approved,
                    });
                }
                book.debit(token, *owner, *amount)?;
                book.credit(token, *to, *amount)?;
                book.allowances.insert(key, approved - amount);
                Ok(())
            }
            TokenOp::Mint { token, to, amount } => {
                let book = self.tokens.entry(token.clone()).or_default();
                book.total_supply =
                    book.total_supply
                        .checked_add(*amount)
                        .ok_or(TokenError::Overflow {
                            token: token.clone(),
                        })?;
                book.credit(token, *to, *amount)
            }
        }
    }
}

/// Reference token ledger kept in memory.
///
/// Clones share the same books, so a test or tool can keep a handle for
/// funding accounts after giving another to the engine.
#[derive(Debug, Clone, Default)]
pub struct InMemoryTokenLedger {
    books: Arc<RwLock<Books>>,
}

impl InMemoryTokenLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder form of [`credit`](Self::credit).
    pub fn with_balance(
        self,
        token: &TokenId,
        who: Address,
        amount: Amount,
    ) -> Result<Self, TokenError> {
        self.credit(token, who, amount)?;
        Ok(self)
    }

    /// Create `amount` out of thin air for `who` (test and tooling funding).
    pub fn credit(&self, token: &TokenId, who: Address, amount: Amount) -> Result<(), TokenError> {
        let mut books = self.books.write();
        books.apply(&TokenOp::Mint {
            token: token.clone(),
            to: who,
            amount,
        })
    }

    /// Destroy `amount` of `who`'s balance.
    pub fn burn(&self, token: &TokenId, who: Address, amount: Amount) -> Result<(), TokenError> {
        let mut books = self.books.write();
        let book = books.tokens.entry(token.clone()).or_default();
        book.debit(token, who, amount)?;
        book.total_supply = book.total_supply.saturating_sub(amount);
        book.burned = book.burned.saturating_add(amount);
        Ok(())
    }

    pub fn total_supply(&self, token: &TokenId) -> Amount {
        self.books
            .read()
            .tokens
            .get(token)
            .map(|b| b.total_supply)
            .unwrap_or(0)
    }

    pub fn burned(&self, token: &TokenId) -> Amount {
        self.books
            .read()
            .tokens
            .get(token)
            .map(|b| b.burned)
            .unwrap_or(0)
    }

    /// Number of batches applied so far.
    pub fn sequence(&self) -> u64 {
        self.books.read().sequence
    }
}

impl TokenLedger for InMemoryTokenLedger {
    fn balance_of(&self, token: &TokenId, who: &Address) -> Amount {
        self.books
            .read()
            .tokens
            .get(token)
            .and_then(|b| b.balances.get(who).copied())
            .unwrap_or(0)
    }

    fn allowance(&self, token: &TokenId, owner: &Address, spender: &Address) -> Amount {
        self.books
            .read()
            .tokens
            .get(token)
            .and_then(|b| b.allowances.get(&(*owner, *spender)).copied())
            .unwrap_or(0)
    }

    fn approve(
        &self,
        token: &TokenId,
        owner: Address,
        spender: Address,
        amount: Amount,
    ) -> Result<(), TokenError> {
        let mut books = self.books.write();
        books
            .tokens
            .entry(token.clone())
            .or_default()
            .allowances
            .insert((owner, spender), amount);
        Ok(())
    }

    fn execute(&self, batch: &TransferBatch) -> Result<TransferReceipt, TokenError> {
        let mut books = self.books.write();

        // Apply to a working copy; the live books are only replaced on success.
        let mut working = Books {
            tokens: books.tokens.clone(),
            sequence: books.sequence,
        };
        for op in &batch.ops {
            working.apply(op)?;
        }
        working.sequence += 1;

        let receipt = TransferReceipt::for_batch(batch, working.sequence);
        *books = working;
        Ok(receipt)
    }
}

// -----------------------------------------------------------------------------
// Mock ledger (records batches, can be told to fail)
// -----------------------------------------------------------------------------

/// Shared view into a [`MockTokenLedger`] that stays usable after the mock
/// has been moved into an engine.
#[derive(Debug, Clone, Default)]
pub struct MockHandle {
    executed: Arc<Mutex<Vec<TransferBatch>>>,
    fail_next: Arc<AtomicBool>,
}

impl MockHandle {
    /// Batches that were successfully applied, in order.
    pub fn executed(&self) -> Vec<TransferBatch> {
        self.executed.lock().clone()
    }

    pub fn executed_count(&self) -> usize {
        self.executed.lock().len()
    }

    /// Make the next `execute` call fail with `TokenError::Rejected`.
    pub fn fail_next(&self) {
        self.fail_next.store(true, Ordering::SeqCst);
    }
}

/// In-memory ledger that records every executed batch.
#[derive(Debug, Clone, Default)]
pub struct MockTokenLedger {
    inner: InMemoryTokenLedger,
    handle: MockHandle,
}

impl MockTokenLedger {
    pub fn new(inner: InMemoryTokenLedger) -> Self {
        Self {
            inner,
            handle: MockHandle::default(),
        }
    }

    pub fn handle(&self) -> MockHandle {
        self.handle.clone()
    }
}

impl TokenLedger for MockTokenLedger {
    fn balance_of(&self, token: &TokenId, who: &Address) -> Amount {
        self.inner.balance_of(token, who)
    }

    fn allowance(&self, token: &TokenId, owner: &Address, spender: &Address) -> Amount {
        self.inner.allowance(token, owner, spender)
    }

    fn approve(
        &self,
        token: &TokenId,
        owner: Address,
        spender: Address,
        amount: Amount,
    ) -> Result<(), TokenError> {
        self.inner.approve(token, owner, spender, amount)
    }

    fn execute(&self, batch: &TransferBatch) -> Result<TransferReceipt, TokenError> {
        if self.handle.fail_next.swap(false, Ordering::SeqCst) {
            return Err(TokenError::Rejected("mock failure injected".into()));
        }
        let receipt = self.inner.execute(batch)?;
        self.handle.executed.lock().push(batch.clone());
        Ok(receipt)
    }
}
