//! The single owned ledger state and its read-only views.

use crate::access::{AccessTable, Capability};
use crate::allocation::{AllocationManager, Batch};
use crate::allowance::MintAllowanceGuard;
use crate::errors::Result;
use crate::marketplace::{Marketplace, SellOrder};
use crate::params::{EngineConfig, LedgerParams, TokensConfig};
use crate::rewards::{RewardLedger, RewardTokenState};
use crate::units::{UnitRegistry, UnitStatus};
use crate::unlock::UnlockSchedule;
use crate::vesting::{VestingSchedule, VestingScheduler};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use unitvault_types::{Address, Amount, BatchId, Timestamp, TokenId, UnitId};

/// Label of the account holding reward pools and escrowed units.
pub const CUSTODY_LABEL: &str = "unitvault.custody";
/// Label of the account funding unit grant withdrawals.
pub const GRANT_CUSTODY_LABEL: &str = "unitvault.grant-custody";
/// Label of the account funding general vesting schedules.
pub const VESTING_CUSTODY_LABEL: &str = "unitvault.vesting-custody";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Accounts {
    pub treasury: Address,
    pub external_share_recipient: Address,
    pub custody: Address,
    pub grant_custody: Address,
    pub vesting_custody: Address,
}

/// Everything the engine owns. Mutated only on a private working copy inside
/// a critical section, then published whole.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedgerState {
    pub params: LedgerParams,
    pub accounts: Accounts,
    pub tokens: TokensConfig,
    pub genesis_time: Option<Timestamp>,
    pub access: AccessTable,
    pub mint_guard: MintAllowanceGuard,
    pub rewards: RewardLedger,
    pub units: UnitRegistry,
    pub allocation: AllocationManager,
    pub market: Marketplace,
    pub vesting: VestingScheduler,
    /// Number of committed operations.
    pub sequence: u64,
}

impl LedgerState {
    pub fn from_config(config: &EngineConfig) -> Result<Self> {
        config.validate()?;
        let params = config.params.clone();

        let mut access = AccessTable::new();
        access.grant(config.accounts.admin, Capability::Admin);
        for grant in &config.grants {
            for capability in &grant.capabilities {
                access.grant(grant.address, *capability);
            }
        }

        Ok(Self {
            accounts: Accounts {
                treasury: config.accounts.treasury,
                external_share_recipient: config.accounts.external_share_recipient,
                custody: Address::derive(CUSTODY_LABEL),
                grant_custody: Address::derive(GRANT_CUSTODY_LABEL),
                vesting_custody: Address::derive(VESTING_CUSTODY_LABEL),
            },
            tokens: config.tokens.clone(),
            genesis_time: config.genesis_time,
            access,
            mint_guard: MintAllowanceGuard::new(&params),
            rewards: RewardLedger::new(
                config.tokens.native.clone(),
                params.max_supply,
                params.unit_share_bps,
            ),
            units: UnitRegistry::new(),
            allocation: AllocationManager::new(params.max_supply),
            market: Marketplace::new(
                config.transfers_enabled,
                config.market_fee_bps,
                params.max_market_fee_bps,
            ),
            vesting: VestingScheduler::new(),
            sequence: 0,
            params,
        })
    }

    pub fn unlock_schedule(&self) -> UnlockSchedule {
        UnlockSchedule::from_params(&self.params)
    }

    pub fn pending(&self, unit_id: UnitId, token: &TokenId) -> Result<Amount> {
        let unit = self.units.get(unit_id)?;
        Ok(self.rewards.pending(&unit.rewards, token))
    }

    pub fn calculate_unlocked(&self, unit_id: UnitId, now: Timestamp) -> Result<Amount> {
        let unit = self.units.get(unit_id)?;
        Ok(unit.calculate_unlocked(&self.unlock_schedule(), now, self.genesis_time))
    }

    pub fn unit_view(&self, unit_id: UnitId, now: Timestamp) -> Result<UnitView> {
        let unit = self.units.get(unit_id)?;
        let schedule = self.unlock_schedule();
        let pending = self
            .rewards
            .known_tokens()
            .into_iter()
            .map(|token| {
                let amount = self.rewards.pending(&unit.rewards, &token);
                (token, amount)
            })
            .collect();

        Ok(UnitView {
            unit_id,
            owner: self.units.owner_of(unit_id)?,
            batch_id: unit.batch_id,
            status: unit.status,
            created_at: unit.created_at,
            termination_initiated_at: unit.termination_initiated_at,
            termination_ready_at: unit.termination_ready_at(self.params.termination_cooldown),
            terminated_at: unit.terminated_at,
            total_locked: unit.total_locked,
            unlocked: unit.calculate_unlocked(&schedule, now, self.genesis_time),
            unlocked_withdrawn: unit.unlocked_withdrawn,
            withdrawable: unit.withdrawable(&schedule, now, self.genesis_time),
            fully_unlocked: schedule.fraction(now, self.genesis_time).is_complete(),
            escrowed: self.market.is_escrowed(unit_id),
            participating: unit.rewards.participating,
            pending,
        })
    }

    /// Accumulator state per known token.
    pub fn accumulators(&self) -> BTreeMap<TokenId, RewardTokenState> {
        self.rewards
            .known_tokens()
            .into_iter()
            .filter_map(|token| {
                let state = self.rewards.token_state(&token)?.clone();
                Some((token, state))
            })
            .collect()
    }

    pub fn schedules_of(&self, beneficiary: &Address, now: Timestamp) -> Vec<ScheduleView> {
        self.vesting
            .schedules_of(beneficiary)
            .into_iter()
            .map(|schedule| ScheduleView {
                releasable: schedule.releasable(now),
                ends_at: schedule.end_time(),
                schedule,
            })
            .collect()
    }

    pub fn snapshot(&self, now: Timestamp) -> LedgerSnapshot {
        let global = &self.rewards.global;
        let units = self
            .units
            .iter()
            .filter_map(|unit| self.unit_view(unit.unit_id, now).ok())
            .collect();
        let schedules = self
            .vesting
            .beneficiaries()
            .iter()
            .flat_map(|b| self.schedules_of(b, now))
            .collect();

        LedgerSnapshot {
            taken_at: now,
            sequence: self.sequence,
            genesis_time: self.genesis_time,
            total_issued: global.total_issued,
            terminated: global.terminated,
            participating: global.participating(),
            last_update_time: global.last_update_time,
            acc_produced_per_unit: self.rewards.acc_produced_per_unit(),
            mint_allowance_remaining: self.mint_guard.remaining(now, self.genesis_time),
            transfers_enabled: self.market.transfers_enabled(),
            market_fee_bps: self.market.fee_bps(),
            active_batch: self.allocation.active_batch().map(|b| b.batch_id),
            batches: self.allocation.batches().to_vec(),
            whitelist: self.allocation.whitelist(),
            accumulators: self.accumulators(),
            units,
            active_orders: self.market.active_orders(),
            schedules,
        }
    }
}

/// Lifecycle, unlock and reward state of one unit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnitView {
    pub unit_id: UnitId,
    pub owner: Address,
    pub batch_id: BatchId,
    pub status: UnitStatus,
    pub created_at: Timestamp,
    pub termination_initiated_at: Option<Timestamp>,
    pub termination_ready_at: Option<Timestamp>,
    pub terminated_at: Option<Timestamp>,
    pub total_locked: Amount,
    pub unlocked: Amount,
    pub unlocked_withdrawn: Amount,
    pub withdrawable: Amount,
    pub fully_unlocked: bool,
    pub escrowed: bool,
    pub participating: bool,
    pub pending: BTreeMap<TokenId, Amount>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScheduleView {
    pub schedule: VestingSchedule,
    pub releasable: Amount,
    /// Time at which the whole schedule is releasable.
    pub ends_at: Timestamp,
}

/// Result of comparing a custody balance against what it still owes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BalanceSufficiency {
    pub sufficient: bool,
    pub required: Amount,
    pub current: Amount,
}

/// Read-only export for the reporting side.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedgerSnapshot {
    pub taken_at: Timestamp,
    pub sequence: u64,
    pub genesis_time: Option<Timestamp>,
    pub total_issued: u32,
    pub terminated: u32,
    pub participating: u32,
    pub last_update_time: Timestamp,
    pub acc_produced_per_unit: Amount,
    pub mint_allowance_remaining: Amount,
    pub transfers_enabled: bool,
    pub market_fee_bps: u16,
    pub active_batch: Option<BatchId>,
    pub batches: Vec<Batch>,
    pub whitelist: Vec<Address>,
    pub accumulators: BTreeMap<TokenId, RewardTokenState>,
    pub units: Vec<UnitView>,
    pub active_orders: Vec<SellOrder>,
    pub schedules: Vec<ScheduleView>,
}
