//! Whitelist and batch-based issuance gate
//!
//! Batches carve capacity out of the fixed supply. The sum of every batch's
//! `max_issuable` never exceeds `max_supply`, and at most one batch is active.

use crate::errors::{LedgerError, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use unitvault_types::{Address, Amount, BatchId, Timestamp};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Batch {
    pub batch_id: BatchId,
    pub max_issuable: u32,
    pub issued_so_far: u32,
    pub unit_price: Amount,
    pub active: bool,
    pub created_at: Timestamp,
}

impl Batch {
    pub fn remaining(&self) -> u32 {
        self.max_issuable.saturating_sub(self.issued_so_far)
    }

    pub fn is_sold_out(&self) -> bool {
        self.issued_so_far >= self.max_issuable
    }
}

/// Slot reserved by a successful issuance check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IssueTicket {
    pub batch_id: BatchId,
    pub unit_price: Amount,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AllocationManager {
    max_supply: u32,
    batches: Vec<Batch>,
    active: Option<BatchId>,
    whitelist: BTreeSet<Address>,
    total_allocated: u32,
}

impl AllocationManager {
    pub fn new(max_supply: u32) -> Self {
        Self {
            max_supply,
            batches: Vec::new(),
            active: None,
            whitelist: BTreeSet::new(),
            total_allocated: 0,
        }
    }

    fn batch_mut(&mut self, batch_id: BatchId) -> Result<&mut Batch> {
        (batch_id as usize)
            .checked_sub(1)
            .and_then(|i| self.batches.get_mut(i))
            .ok_or_else(|| LedgerError::not_found("batch", batch_id))
    }

    pub fn batch(&self, batch_id: BatchId) -> Result<&Batch> {
        (batch_id as usize)
            .checked_sub(1)
            .and_then(|i| self.batches.get(i))
            .ok_or_else(|| LedgerError::not_found("batch", batch_id))
    }

    pub fn batches(&self) -> &[Batch] {
        &self.batches
    }

    pub fn active_batch(&self) -> Option<&Batch> {
        self.active.and_then(|id| self.batch(id).ok())
    }

    /// Capacity not yet assigned to any batch.
    pub fn unallocated(&self) -> u32 {
        self.max_supply.saturating_sub(self.total_allocated)
    }

    fn deactivate_current(&mut self) {
        if let Some(current) = self.active.take() {
            if let Ok(batch) = self.batch_mut(current) {
                batch.active = false;
            }
        }
    }

    /// Create a batch and make it the active one.
    pub fn create_batch(
        &mut self,
        max_issuable: u32,
        unit_price: Amount,
        now: Timestamp,
    ) -> Result<BatchId> {
        if max_issuable == 0 {
            return Err(LedgerError::InvalidAmount("batch capacity must be positive"));
        }
        let remaining = self.unallocated();
        if max_issuable > remaining {
            return Err(LedgerError::SupplyExceeded {
                requested: max_issuable,
                remaining,
            });
        }

        self.deactivate_current();
        let batch_id = self.batches.len() as BatchId + 1;
        self.batches.push(Batch {
            batch_id,
            max_issuable,
            issued_so_far: 0,
            unit_price,
            active: true,
            created_at: now,
        });
        self.active = Some(batch_id);
        self.total_allocated += max_issuable;
        Ok(batch_id)
    }

    /// Switch the active batch, deactivating the current one.
    pub fn activate_batch(&mut self, batch_id: BatchId) -> Result<()> {
        self.batch(batch_id)?;
        self.deactivate_current();
        self.batch_mut(batch_id)?.active = true;
        self.active = Some(batch_id);
        Ok(())
    }

    /// Returns how many addresses were newly added.
    pub fn add_to_whitelist(&mut self, addresses: &[Address]) -> usize {
        addresses
            .iter()
            .filter(|addr| self.whitelist.insert(**addr))
            .count()
    }

    pub fn remove_from_whitelist(&mut self, address: &Address) -> bool {
        self.whitelist.remove(address)
    }

    pub fn is_whitelisted(&self, address: &Address) -> bool {
        self.whitelist.contains(address)
    }

    pub fn whitelist(&self) -> Vec<Address> {
        self.whitelist.iter().copied().collect()
    }

    pub fn whitelist_len(&self) -> usize {
        self.whitelist.len()
    }

    /// Check every issuance precondition and consume one slot of the active batch.
    pub fn reserve_issue(&mut self, caller: &Address, total_issued: u32) -> Result<IssueTicket> {
        if !self.is_whitelisted(caller) {
            return Err(LedgerError::NotWhitelisted(*caller));
        }
        let batch_id = self.active.ok_or(LedgerError::NoActiveBatch)?;
        let max_supply = self.max_supply;
        let batch = self.batch_mut(batch_id)?;
        if batch.is_sold_out() {
            return Err(LedgerError::BatchSoldOut(batch_id));
        }
        if total_issued >= max_supply {
            return Err(LedgerError::SupplyExhausted { max_supply });
        }
        batch.issued_so_far += 1;
        Ok(IssueTicket {
            batch_id,
            unit_price: batch.unit_price,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_address(label: &str) -> Address {
        Address::derive(label)
    }

    #[test]
    fn test_create_batch_flips_activity() {
        let mut manager = AllocationManager::new(5_000);
        let first = manager.create_batch(100, 10, 0).unwrap();
        let second = manager.create_batch(50, 10, 0).unwrap();

        assert!(!manager.batch(first).unwrap().active);
        assert!(manager.batch(second).unwrap().active);

        manager.activate_batch(first).unwrap();
        assert!(manager.batch(first).unwrap().active);
        assert!(!manager.batch(second).unwrap().active);
        assert_eq!(manager.active_batch().unwrap().batch_id, first);
        assert!(manager.activate_batch(9).is_err());
    }

    #[test]
    fn test_capacity_is_bounded_by_supply() {
        let mut manager = AllocationManager::new(5_000);
        assert!(matches!(
            manager.create_batch(5_001, 1, 0),
            Err(LedgerError::SupplyExceeded {
                requested: 5_001,
                remaining: 5_000
            })
        ));
        manager.create_batch(4_000, 1, 0).unwrap();
        assert!(manager.create_batch(1_001, 1, 0).is_err());
        manager.create_batch(1_000, 1, 0).unwrap();
        assert_eq!(manager.unallocated(), 0);
        assert!(matches!(
            manager.create_batch(0, 1, 0),
            Err(LedgerError::InvalidAmount(_))
        ));
    }

    #[test]
    fn test_reserve_issue_checks() {
        let buyer = test_address("buyer");
        let mut manager = AllocationManager::new(5_000);

        assert!(matches!(
            manager.reserve_issue(&buyer, 0),
            Err(LedgerError::NotWhitelisted(_))
        ));
        assert_eq!(manager.add_to_whitelist(&[buyer, buyer]), 1);
        assert!(matches!(
            manager.reserve_issue(&buyer, 0),
            Err(LedgerError::NoActiveBatch)
        ));

        let batch_id = manager.create_batch(1, 25, 0).unwrap();
        let ticket = manager.reserve_issue(&buyer, 0).unwrap();
        assert_eq!(ticket, IssueTicket { batch_id, unit_price: 25 });
        assert!(matches!(
            manager.reserve_issue(&buyer, 1),
            Err(LedgerError::BatchSoldOut(id)) if id == batch_id
        ));

        assert!(manager.remove_from_whitelist(&buyer));
        assert!(!manager.remove_from_whitelist(&buyer));
        assert!(manager.whitelist().is_empty());
    }
}
