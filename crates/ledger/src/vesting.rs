//! Linear vesting schedules for non-unit grants (team, investors, advisors)
//!
//! Each schedule starts `lock_period` after genesis and releases linearly over
//! `release_duration`. Custody sufficiency is not enforced at creation; it is
//! checked on demand with [`VestingScheduler::outstanding`].

use crate::errors::{LedgerError, Result};
use crate::unlock::linear_release;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use unitvault_types::{Address, Amount, ScheduleId, Timestamp};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VestingSchedule {
    pub schedule_id: ScheduleId,
    pub beneficiary: Address,
    pub total_amount: Amount,
    pub lock_period: Timestamp,
    pub release_duration: Timestamp,
    pub start_time: Timestamp,
    pub released: Amount,
    pub created_at: Timestamp,
}

impl VestingSchedule {
    pub fn vested(&self, now: Timestamp) -> Amount {
        linear_release(self.total_amount, now, self.start_time, self.release_duration)
    }

    pub fn releasable(&self, now: Timestamp) -> Amount {
        self.vested(now).saturating_sub(self.released)
    }

    pub fn outstanding(&self) -> Amount {
        self.total_amount - self.released
    }

    pub fn end_time(&self) -> Timestamp {
        self.start_time.saturating_add(self.release_duration)
    }
}

/// Parameters of a schedule to create.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScheduleRequest {
    pub beneficiary: Address,
    #[serde(with = "unitvault_types::amount_serde")]
    pub total_amount: Amount,
    pub lock_period: Timestamp,
    pub release_duration: Timestamp,
}

/// A single release paid out.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Release {
    pub schedule_id: ScheduleId,
    pub beneficiary: Address,
    pub amount: Amount,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct VestingScheduler {
    schedules: Vec<VestingSchedule>,
    by_beneficiary: BTreeMap<Address, Vec<ScheduleId>>,
}

impl VestingScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.schedules.is_empty()
    }

    pub fn create(
        &mut self,
        request: &ScheduleRequest,
        genesis: Option<Timestamp>,
        now: Timestamp,
    ) -> Result<ScheduleId> {
        let genesis = genesis.ok_or(LedgerError::GenesisNotSet)?;
        if request.total_amount == 0 {
            return Err(LedgerError::InvalidAmount("vesting amount must be positive"));
        }
        if request.release_duration == 0 {
            return Err(LedgerError::InvalidAmount(
                "vesting release duration must be positive",
            ));
        }

        let schedule_id = self.schedules.len() as ScheduleId + 1;
        self.schedules.push(VestingSchedule {
            schedule_id,
            beneficiary: request.beneficiary,
            total_amount: request.total_amount,
            lock_period: request.lock_period,
            release_duration: request.release_duration,
            start_time: genesis.saturating_add(request.lock_period),
            released: 0,
            created_at: now,
        });
        self.by_beneficiary
            .entry(request.beneficiary)
            .or_default()
            .push(schedule_id);
        Ok(schedule_id)
    }

    pub fn get(&self, schedule_id: ScheduleId) -> Result<&VestingSchedule> {
        (schedule_id as usize)
            .checked_sub(1)
            .and_then(|i| self.schedules.get(i))
            .ok_or_else(|| LedgerError::not_found("schedule", schedule_id))
    }

    fn get_mut(&mut self, schedule_id: ScheduleId) -> Result<&mut VestingSchedule> {
        (schedule_id as usize)
            .checked_sub(1)
            .and_then(|i| self.schedules.get_mut(i))
            .ok_or_else(|| LedgerError::not_found("schedule", schedule_id))
    }

    pub fn calculate_releasable(&self, schedule_id: ScheduleId, now: Timestamp) -> Result<Amount> {
        Ok(self.get(schedule_id)?.releasable(now))
    }

    pub fn schedules_of(&self, beneficiary: &Address) -> Vec<VestingSchedule> {
        self.by_beneficiary
            .get(beneficiary)
            .into_iter()
            .flatten()
            .filter_map(|id| self.get(*id).ok())
            .cloned()
            .collect()
    }

    pub fn beneficiaries(&self) -> Vec<Address> {
        self.by_beneficiary.keys().copied().collect()
    }

    /// Sum of every schedule's total amount.
    pub fn total_vested(&self) -> Amount {
        self.schedules
            .iter()
            .fold(0, |acc: Amount, s| acc.saturating_add(s.total_amount))
    }

    /// Amount still owed across all schedules.
    pub fn outstanding(&self) -> Amount {
        self.schedules
            .iter()
            .fold(0, |acc: Amount, s| acc.saturating_add(s.outstanding()))
    }

    /// Release one schedule.
    pub fn release(&mut self, schedule_id: ScheduleId, now: Timestamp) -> Result<Release> {
        let schedule = self.get_mut(schedule_id)?;
        let amount = schedule.releasable(now);
        if amount == 0 {
            return Err(LedgerError::NothingToRelease);
        }
        schedule.released += amount;
        Ok(Release {
            schedule_id,
            beneficiary: schedule.beneficiary,
            amount,
        })
    }

    /// Release every listed schedule that has something releasable.
    ///
    /// Unknown ids fail the whole call; zero-releasable schedules are skipped.
    pub fn release_many(&mut self, schedule_ids: &[ScheduleId], now: Timestamp) -> Result<Vec<Release>> {
        for id in schedule_ids {
            self.get(*id)?;
        }
        let mut releases = Vec::new();
        for id in schedule_ids {
            match self.release(*id, now) {
                Ok(release) => releases.push(release),
                Err(LedgerError::NothingToRelease) => continue,
                Err(other) => return Err(other),
            }
        }
        if releases.is_empty() {
            return Err(LedgerError::NothingToRelease);
        }
        Ok(releases)
    }

    pub fn release_all(&mut self, beneficiary: &Address, now: Timestamp) -> Result<Vec<Release>> {
        let ids = self
            .by_beneficiary
            .get(beneficiary)
            .cloned()
            .unwrap_or_default();
        self.release_many(&ids, now)
    }
}
