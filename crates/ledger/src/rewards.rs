//! Reward-per-slot accumulators and the vault of unissued slots
//!
//! Every distribution is spread over the whole slot universe (`max_supply`),
//! issued or not. Each slot's share lands in a per-token accumulator; slots
//! without a participating unit have their share skimmed into the vault.
//! A unit's pending amount is the accumulator minus its recorded debt.
//!
//! The floor-division remainder of a distribution is carried into the next
//! distribution of the same token, so nothing is lost to rounding:
//!
//! `claimed + vault + extracted + pending + carried_dust == Σ unit_share`

use crate::errors::{LedgerError, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::{debug, info};
use unitvault_types::{bps_of, Amount, Timestamp, TokenId};

/// Process-wide counters that shape every distribution.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GlobalState {
    pub total_issued: u32,
    /// Units confirmed terminated; their slots no longer participate.
    pub terminated: u32,
    /// Time of the last native distribution.
    pub last_update_time: Timestamp,
}

impl GlobalState {
    pub fn participating(&self) -> u32 {
        self.total_issued.saturating_sub(self.terminated)
    }
}

/// Accumulator and custody bookkeeping for one reward token.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RewardTokenState {
    /// Total ever credited to a single slot. Never decreases.
    pub acc_reward_per_unit: Amount,
    pub vault_balance: Amount,
    /// Remainder of the last division, added to the next distribution.
    pub carried_dust: Amount,
    pub distributed_unit_share: Amount,
    pub distributed_external_share: Amount,
    pub claimed: Amount,
    pub extracted: Amount,
    pub distributions: u64,
}

/// Per-unit baselines and settled balances.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RewardPosition {
    pub produced_debt: Amount,
    pub reward_debt: BTreeMap<TokenId, Amount>,
    /// Amounts frozen at termination, still claimable.
    pub settled: BTreeMap<TokenId, Amount>,
    pub participating: bool,
}

impl Default for RewardPosition {
    fn default() -> Self {
        Self {
            produced_debt: 0,
            reward_debt: BTreeMap::new(),
            settled: BTreeMap::new(),
            participating: true,
        }
    }
}

/// Outcome of a single `distribute` call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DistributionResult {
    pub token: TokenId,
    pub amount: Amount,
    pub unit_share: Amount,
    pub external_share: Amount,
    pub per_unit_delta: Amount,
    pub vault_delta: Amount,
    pub dust_carried: Amount,
    pub participating: u32,
}

/// The accumulator engine for the produced token and every reward token.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RewardLedger {
    native: TokenId,
    max_supply: u32,
    unit_share_bps: u16,
    pub global: GlobalState,
    produced: RewardTokenState,
    reward_tokens: BTreeMap<TokenId, RewardTokenState>,
}

impl RewardLedger {
    pub fn new(native: TokenId, max_supply: u32, unit_share_bps: u16) -> Self {
        Self {
            native,
            max_supply,
            unit_share_bps,
            global: GlobalState::default(),
            produced: RewardTokenState::default(),
            reward_tokens: BTreeMap::new(),
        }
    }

    pub fn native(&self) -> &TokenId {
        &self.native
    }

    pub fn is_native(&self, token: &TokenId) -> bool {
        *token == self.native
    }

    pub fn acc_produced_per_unit(&self) -> Amount {
        self.produced.acc_reward_per_unit
    }

    /// Accumulator state for `token`, if it has ever been distributed (native always exists).
    pub fn token_state(&self, token: &TokenId) -> Option<&RewardTokenState> {
        if self.is_native(token) {
            Some(&self.produced)
        } else {
            self.reward_tokens.get(token)
        }
    }

    fn token_state_mut(&mut self, token: &TokenId) -> &mut RewardTokenState {
        if *token == self.native {
            &mut self.produced
        } else {
            self.reward_tokens.entry(token.clone()).or_default()
        }
    }

    /// Native token first, then reward tokens in id order.
    pub fn known_tokens(&self) -> Vec<TokenId> {
        std::iter::once(self.native.clone())
            .chain(self.reward_tokens.keys().cloned())
            .collect()
    }

    pub fn vault_balance(&self, token: &TokenId) -> Amount {
        self.token_state(token).map(|s| s.vault_balance).unwrap_or(0)
    }

    /// Split `amount`, advance the accumulator and skim unissued slots into the vault.
    pub fn distribute(
        &mut self,
        token: &TokenId,
        amount: Amount,
        now: Timestamp,
    ) -> Result<DistributionResult> {
        if amount == 0 {
            return Err(LedgerError::InvalidAmount("distribution amount must be positive"));
        }

        let unit_share = bps_of(amount, self.unit_share_bps)
            .ok_or(LedgerError::ArithmeticOverflow("unit share"))?;
        let external_share = amount - unit_share;
        let max_supply = self.max_supply as Amount;
        let participating = self.global.participating();
        let absent_slots = max_supply.saturating_sub(participating as Amount);
        let is_native = self.is_native(token);

        let state = self.token_state_mut(token);
        let pool = unit_share
            .checked_add(state.carried_dust)
            .ok_or(LedgerError::ArithmeticOverflow("distribution pool"))?;
        let per_unit_delta = pool / max_supply;
        let dust = pool % max_supply;
        let vault_delta = per_unit_delta * absent_slots;

        let acc = state
            .acc_reward_per_unit
            .checked_add(per_unit_delta)
            .ok_or(LedgerError::ArithmeticOverflow("accumulator"))?;
        let vault = state
            .vault_balance
            .checked_add(vault_delta)
            .ok_or(LedgerError::ArithmeticOverflow("vault balance"))?;
        let distributed = state
            .distributed_unit_share
            .checked_add(unit_share)
            .ok_or(LedgerError::ArithmeticOverflow("distributed total"))?;

        state.acc_reward_per_unit = acc;
        state.vault_balance = vault;
        state.carried_dust = dust;
        state.distributed_unit_share = distributed;
        state.distributed_external_share = state
            .distributed_external_share
            .saturating_add(external_share);
        state.distributions += 1;

        if is_native {
            self.global.last_update_time = now;
        }

        debug!(
            target: "ledger",
            "Distribution of {} {}: delta {} per slot, vault +{}, dust {} carried",
            amount,
            token,
            per_unit_delta,
            vault_delta,
            dust
        );

        Ok(DistributionResult {
            token: token.clone(),
            amount,
            unit_share,
            external_share,
            per_unit_delta,
            vault_delta,
            dust_carried: dust,
            participating,
        })
    }

    fn debt_of(&self, position: &RewardPosition, token: &TokenId) -> Amount {
        if self.is_native(token) {
            position.produced_debt
        } else {
            position.reward_debt.get(token).copied().unwrap_or(0)
        }
    }

    fn set_debt(&self, position: &mut RewardPosition, token: &TokenId, value: Amount) {
        if self.is_native(token) {
            position.produced_debt = value;
        } else {
            position.reward_debt.insert(token.clone(), value);
        }
    }

    /// Amount claimable by `position` for `token` right now.
    pub fn pending(&self, position: &RewardPosition, token: &TokenId) -> Amount {
        let settled = position.settled.get(token).copied().unwrap_or(0);
        if !position.participating {
            return settled;
        }
        let acc = self
            .token_state(token)
            .map(|s| s.acc_reward_per_unit)
            .unwrap_or(0);
        acc.saturating_sub(self.debt_of(position, token))
            .saturating_add(settled)
    }

    /// Move the debt baseline to the current accumulator and return what was pending.
    ///
    /// Zero is a valid result; a second claim without an intervening
    /// distribution always returns zero.
    pub fn claim(&mut self, position: &mut RewardPosition, token: &TokenId) -> Amount {
        let amount = self.pending(position, token);
        if position.participating {
            let acc = self
                .token_state(token)
                .map(|s| s.acc_reward_per_unit)
                .unwrap_or(0);
            self.set_debt(position, token, acc);
        }
        position.settled.remove(token);

        if amount > 0 {
            let state = self.token_state_mut(token);
            state.claimed = state.claimed.saturating_add(amount);
        }
        amount
    }

    /// Record the current accumulator as the baseline for `token`.
    pub fn seed_debt(&self, position: &mut RewardPosition, token: &TokenId) {
        let acc = self
            .token_state(token)
            .map(|s| s.acc_reward_per_unit)
            .unwrap_or(0);
        self.set_debt(position, token, acc);
    }

    /// Seed every known token for a freshly issued unit and count it as issued.
    pub fn register_unit(&mut self) -> RewardPosition {
        let mut position = RewardPosition::default();
        for token in self.known_tokens() {
            self.seed_debt(&mut position, &token);
        }
        self.global.total_issued += 1;
        position
    }

    /// Freeze a terminated unit's pending amounts and stop its participation.
    pub fn retire(&mut self, position: &mut RewardPosition) {
        if !position.participating {
            return;
        }
        for token in self.known_tokens() {
            let owed = self.pending(position, &token);
            if owed > 0 {
                position.settled.insert(token.clone(), owed);
            }
            self.seed_debt(position, &token);
        }
        position.participating = false;
        self.global.terminated += 1;
    }

    /// Empty the vault for `token`, returning the extracted amount (zero is fine).
    pub fn extract_vault(&mut self, token: &TokenId) -> Amount {
        let Some(state) = (if self.is_native(token) {
            Some(&mut self.produced)
        } else {
            self.reward_tokens.get_mut(token)
        }) else {
            return 0;
        };
        let amount = std::mem::take(&mut state.vault_balance);
        state.extracted = state.extracted.saturating_add(amount);
        if amount > 0 {
            info!(target: "ledger", "Vault of {} emptied: {}", token, amount);
        }
        amount
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use unitvault_types::tokens;

    fn uvt() -> TokenId {
        TokenId::new("UVT")
    }

    fn usdt() -> TokenId {
        TokenId::new("USDT")
    }

    fn ledger() -> RewardLedger {
        RewardLedger::new(uvt(), 5_000, 8_000)
    }

    #[test]
    fn test_single_unit_scenario() {
        let mut ledger = ledger();
        let position = ledger.register_unit();

        let result = ledger.distribute(&uvt(), 50_000, 10).unwrap();
        assert_eq!(result.unit_share, 40_000);
        assert_eq!(result.external_share, 10_000);
        assert_eq!(result.per_unit_delta, 8);
        assert_eq!(result.vault_delta, 8 * 4_999);
        assert_eq!(ledger.pending(&position, &uvt()), 8);
        assert_eq!(ledger.vault_balance(&uvt()), 39_992);
        assert_eq!(ledger.global.last_update_time, 10);
    }

    #[test]
    fn test_no_retroactive_entitlement() {
        let mut ledger = ledger();
        let early = ledger.register_unit();
        ledger.distribute(&usdt(), tokens(1), 0).unwrap();
        let late = ledger.register_unit();

        assert!(ledger.pending(&early, &usdt()) > 0);
        assert_eq!(ledger.pending(&late, &usdt()), 0);
    }

    #[test]
    fn test_claim_is_idempotent() {
        let mut ledger = ledger();
        let mut position = ledger.register_unit();
        ledger.distribute(&usdt(), 1_000_000, 0).unwrap();

        let first = ledger.claim(&mut position, &usdt());
        let second = ledger.claim(&mut position, &usdt());
        assert_eq!(first, 160);
        assert_eq!(second, 0);
        assert_eq!(ledger.token_state(&usdt()).unwrap().claimed, 160);
    }

    #[test]
    fn test_dust_is_carried_forward() {
        let mut ledger = ledger();
        ledger.register_unit();

        // 80% of 6_249 = 4_999, below one unit per slot.
        let first = ledger.distribute(&usdt(), 6_249, 0).unwrap();
        assert_eq!(first.per_unit_delta, 0);
        assert_eq!(first.dust_carried, 4_999);

        let second = ledger.distribute(&usdt(), 2, 0).unwrap();
        assert_eq!(second.unit_share, 1);
        assert_eq!(second.per_unit_delta, 1);
        assert_eq!(second.dust_carried, 0);
    }

    #[test]
    fn test_retired_unit_keeps_settled_and_stops_accruing() {
        let mut ledger = ledger();
        let mut leaving = ledger.register_unit();
        let staying = ledger.register_unit();

        ledger.distribute(&uvt(), 50_000, 0).unwrap();
        ledger.retire(&mut leaving);
        assert_eq!(ledger.global.participating(), 1);

        let result = ledger.distribute(&uvt(), 50_000, 0).unwrap();
        assert_eq!(result.vault_delta, 8 * 4_999);
        assert_eq!(ledger.pending(&leaving, &uvt()), 8);
        assert_eq!(ledger.pending(&staying, &uvt()), 16);

        assert_eq!(ledger.claim(&mut leaving, &uvt()), 8);
        assert_eq!(ledger.pending(&leaving, &uvt()), 0);
    }

    #[test]
    fn test_extract_vault_resets_balance() {
        let mut ledger = ledger();
        ledger.distribute(&usdt(), 50_000, 0).unwrap();

        assert_eq!(ledger.extract_vault(&usdt()), 40_000);
        assert_eq!(ledger.extract_vault(&usdt()), 0);
        assert_eq!(ledger.extract_vault(&TokenId::new("NOPE")), 0);
        assert_eq!(ledger.token_state(&usdt()).unwrap().extracted, 40_000);
    }

    #[test]
    fn test_zero_distribution_rejected() {
        let mut ledger = ledger();
        assert!(matches!(
            ledger.distribute(&uvt(), 0, 0),
            Err(LedgerError::InvalidAmount(_))
        ));
        assert!(ledger.token_state(&usdt()).is_none());
    }
}
