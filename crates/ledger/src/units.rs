//! Unit lifecycle and the holder registry
//!
//! ```text
//! Active ──initiate──▶ PendingTermination ──confirm (after cooldown)──▶ Terminated
//!    ▲                        │
//!    └───────cancel───────────┘
//! ```
//!
//! Unlock withdrawal does not depend on the lifecycle state: a terminated
//! unit keeps its right to already vested principal.

use crate::errors::{LedgerError, Result};
use crate::rewards::RewardPosition;
use crate::unlock::UnlockSchedule;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use unitvault_types::{Address, Amount, BatchId, Timestamp, UnitId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnitStatus {
    Active,
    PendingTermination,
    Terminated,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Unit {
    pub unit_id: UnitId,
    pub batch_id: BatchId,
    pub status: UnitStatus,
    pub created_at: Timestamp,
    pub termination_initiated_at: Option<Timestamp>,
    pub terminated_at: Option<Timestamp>,
    pub total_locked: Amount,
    pub unlocked_withdrawn: Amount,
    pub rewards: RewardPosition,
}

impl Unit {
    pub fn new(
        unit_id: UnitId,
        batch_id: BatchId,
        total_locked: Amount,
        created_at: Timestamp,
        rewards: RewardPosition,
    ) -> Self {
        Self {
            unit_id,
            batch_id,
            status: UnitStatus::Active,
            created_at,
            termination_initiated_at: None,
            terminated_at: None,
            total_locked,
            unlocked_withdrawn: 0,
            rewards,
        }
    }

    pub fn is_active(&self) -> bool {
        self.status == UnitStatus::Active
    }

    pub fn initiate_termination(&mut self, now: Timestamp) -> Result<()> {
        if self.status != UnitStatus::Active {
            return Err(LedgerError::wrong_state("unit", self.unit_id, self.status));
        }
        self.status = UnitStatus::PendingTermination;
        self.termination_initiated_at = Some(now);
        Ok(())
    }

    pub fn cancel_termination(&mut self) -> Result<()> {
        if self.status != UnitStatus::PendingTermination {
            return Err(LedgerError::wrong_state("unit", self.unit_id, self.status));
        }
        self.status = UnitStatus::Active;
        self.termination_initiated_at = None;
        Ok(())
    }

    /// Time at which a pending termination may be confirmed.
    pub fn termination_ready_at(&self, cooldown: Timestamp) -> Option<Timestamp> {
        self.termination_initiated_at
            .map(|initiated| initiated.saturating_add(cooldown))
    }

    pub fn confirm_termination(&mut self, now: Timestamp, cooldown: Timestamp) -> Result<()> {
        let ready_at = match (self.status, self.termination_ready_at(cooldown)) {
            (UnitStatus::PendingTermination, Some(ready_at)) => ready_at,
            _ => return Err(LedgerError::wrong_state("unit", self.unit_id, self.status)),
        };
        if now < ready_at {
            return Err(LedgerError::CooldownNotElapsed { ready_at, now });
        }
        self.status = UnitStatus::Terminated;
        self.terminated_at = Some(now);
        Ok(())
    }

    /// Unlocked portion of the grant, capped at `total_locked`.
    pub fn calculate_unlocked(
        &self,
        schedule: &UnlockSchedule,
        now: Timestamp,
        genesis: Option<Timestamp>,
    ) -> Amount {
        schedule.unlocked(self.total_locked, now, genesis)
    }

    pub fn withdrawable(
        &self,
        schedule: &UnlockSchedule,
        now: Timestamp,
        genesis: Option<Timestamp>,
    ) -> Amount {
        self.calculate_unlocked(schedule, now, genesis)
            .saturating_sub(self.unlocked_withdrawn)
    }

    /// Mark the currently withdrawable amount as withdrawn and return it.
    pub fn take_withdrawable(
        &mut self,
        schedule: &UnlockSchedule,
        now: Timestamp,
        genesis: Option<Timestamp>,
    ) -> Result<Amount> {
        let amount = self.withdrawable(schedule, now, genesis);
        if amount == 0 {
            return Err(LedgerError::NothingToWithdraw(self.unit_id));
        }
        self.unlocked_withdrawn += amount;
        Ok(amount)
    }
}

/// Issued units plus the holder of record for each.
///
/// Units are stored densely: id `n` lives at index `n - 1`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UnitRegistry {
    units: Vec<Unit>,
    owners: BTreeMap<UnitId, Address>,
}

impl UnitRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.units.len()
    }

    pub fn is_empty(&self) -> bool {
        self.units.is_empty()
    }

    pub fn next_id(&self) -> UnitId {
        self.units.len() as UnitId + 1
    }

    pub fn insert(&mut self, unit: Unit, owner: Address) {
        self.owners.insert(unit.unit_id, owner);
        self.units.push(unit);
    }

    fn index(unit_id: UnitId) -> Option<usize> {
        (unit_id as usize).checked_sub(1)
    }

    /// Grant principal still owed to unit holders.
    pub fn outstanding_grants(&self) -> Amount {
        self.units
            .iter()
            .map(|unit| unit.total_locked.saturating_sub(unit.unlocked_withdrawn))
            .sum()
    }

    pub fn get(&self, unit_id: UnitId) -> Result<&Unit> {
        Self::index(unit_id)
            .and_then(|i| self.units.get(i))
            .ok_or_else(|| LedgerError::not_found("unit", unit_id))
    }

    pub fn get_mut(&mut self, unit_id: UnitId) -> Result<&mut Unit> {
        Self::index(unit_id)
            .and_then(|i| self.units.get_mut(i))
            .ok_or_else(|| LedgerError::not_found("unit", unit_id))
    }

    pub fn owner_of(&self, unit_id: UnitId) -> Result<Address> {
        self.owners
            .get(&unit_id)
            .copied()
            .ok_or_else(|| LedgerError::not_found("unit", unit_id))
    }

    pub fn require_owner(&self, caller: &Address, unit_id: UnitId) -> Result<()> {
        if self.owner_of(unit_id)? == *caller {
            Ok(())
        } else {
            Err(LedgerError::NotOwner {
                caller: *caller,
                entity: "unit",
                id: unit_id as u64,
            })
        }
    }

    pub fn set_owner(&mut self, unit_id: UnitId, owner: Address) -> Result<()> {
        let slot = self
            .owners
            .get_mut(&unit_id)
            .ok_or_else(|| LedgerError::not_found("unit", unit_id))?;
        *slot = owner;
        Ok(())
    }

    pub fn units_of(&self, owner: &Address) -> Vec<UnitId> {
        self.owners
            .iter()
            .filter(|(_, holder)| *holder == owner)
            .map(|(id, _)| *id)
            .collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Unit> {
        self.units.iter()
    }
}
