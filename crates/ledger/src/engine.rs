//! The engine: serialized critical sections over a published state snapshot.
//!
//! Every mutating entry point runs through [`Engine::transact`]:
//! 1. take the writer lock and read the clock once,
//! 2. clone the committed state into a working copy,
//! 3. check capabilities, validate and apply the operation to the copy while
//!    queueing token movements,
//! 4. hand the queued movements to the token collaborator as one batch,
//! 5. publish the copy.
//!
//! A failure at any step leaves the committed state and all balances as
//! they were. Readers clone the published `Arc` and never block writers.

use crate::access::Capability;
use crate::allocation::Batch;
use crate::errors::{LedgerError, Result};
use crate::marketplace::{SellOrder, Settlement};
use crate::params::EngineConfig;
use crate::rewards::{DistributionResult, RewardTokenState};
use crate::state::{BalanceSufficiency, LedgerSnapshot, LedgerState, ScheduleView, UnitView};
use crate::token_ledger::TokenLedger;
use crate::transaction::{Committed, Transaction};
use crate::units::UnitStatus;
use crate::vesting::{Release, ScheduleRequest};
use parking_lot::{Mutex, RwLock};
use std::sync::Arc;
use tracing::{debug, info, warn};
use unitvault_types::{
    Address, Amount, BatchId, Clock, OrderId, ScheduleId, Timestamp, TokenId, UnitId,
};

pub struct Engine {
    committed: RwLock<Arc<LedgerState>>,
    write_lock: Mutex<()>,
    tokens: Arc<dyn TokenLedger>,
    clock: Arc<dyn Clock>,
}

impl Engine {
    pub fn new(
        config: EngineConfig,
        tokens: Arc<dyn TokenLedger>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        let state = LedgerState::from_config(&config)?;
        if let Some(genesis) = state.genesis_time {
            if genesis > clock.now() {
                return Err(LedgerError::Config(format!(
                    "genesis_time {genesis} is in the future"
                )));
            }
        }

        info!(
            target: "ledger",
            "Engine started: max_supply={}, unit_share_bps={}, native={}, payment={}",
            state.params.max_supply,
            state.params.unit_share_bps,
            state.tokens.native,
            state.tokens.payment
        );

        Ok(Self {
            committed: RwLock::new(Arc::new(state)),
            write_lock: Mutex::new(()),
            tokens,
            clock,
        })
    }

    /// Run `body` as one serialized, all-or-nothing critical section.
    pub fn transact<T>(
        &self,
        operation: &str,
        caller: Address,
        body: impl FnOnce(&mut Transaction) -> Result<T>,
    ) -> Result<Committed<T>> {
        let _guard = self.write_lock.lock();
        let now = self.clock.now();
        let base = self.committed.read().clone();
        let mut tx = Transaction::new((*base).clone(), caller, now);

        let outcome = body(&mut tx).and_then(|value| {
            let receipt = if tx.transfers.is_empty() {
                None
            } else {
                Some(self.tokens.execute(&tx.transfers)?)
            };
            Ok((value, receipt))
        });

        let (value, receipt) = match outcome {
            Ok(done) => done,
            Err(err) => {
                if err.is_routine() {
                    debug!(target: "ledger", "{} by {:?}: {}", operation, caller, err);
                } else {
                    warn!(target: "ledger", "{} by {:?} rejected: {}", operation, caller, err);
                }
                return Err(err);
            }
        };

        tx.state.sequence += 1;
        let committed = Committed::new(value, operation, tx.state.sequence, receipt);
        *self.committed.write() = Arc::new(tx.state);
        Ok(committed)
    }

    // ---------------------------------------------------------------------
    // Read side
    // ---------------------------------------------------------------------

    /// Cheap snapshot of the committed state.
    pub fn state(&self) -> Arc<LedgerState> {
        self.committed.read().clone()
    }

    pub fn now(&self) -> Timestamp {
        self.clock.now()
    }

    pub fn custody_address(&self) -> Address {
        self.state().accounts.custody
    }

    pub fn grant_custody_address(&self) -> Address {
        self.state().accounts.grant_custody
    }

    pub fn vesting_custody_address(&self) -> Address {
        self.state().accounts.vesting_custody
    }

    pub fn native_token(&self) -> TokenId {
        self.state().tokens.native.clone()
    }

    pub fn payment_token(&self) -> TokenId {
        self.state().tokens.payment.clone()
    }

    pub fn snapshot(&self) -> LedgerSnapshot {
        self.state().snapshot(self.now())
    }

    pub fn pending(&self, unit_id: UnitId, token: &TokenId) -> Result<Amount> {
        self.state().pending(unit_id, token)
    }

    pub fn calculate_unlocked(&self, unit_id: UnitId) -> Result<Amount> {
        self.state().calculate_unlocked(unit_id, self.now())
    }

    pub fn calculate_releasable(&self, schedule_id: ScheduleId) -> Result<Amount> {
        self.state()
            .vesting
            .calculate_releasable(schedule_id, self.now())
    }

    pub fn unit_view(&self, unit_id: UnitId) -> Result<UnitView> {
        self.state().unit_view(unit_id, self.now())
    }

    pub fn units_of(&self, owner: &Address) -> Vec<UnitId> {
        self.state().units.units_of(owner)
    }

    pub fn batches(&self) -> Vec<Batch> {
        self.state().allocation.batches().to_vec()
    }

    pub fn active_batch(&self) -> Option<Batch> {
        self.state().allocation.active_batch().cloned()
    }

    pub fn is_whitelisted(&self, who: &Address) -> bool {
        self.state().allocation.is_whitelisted(who)
    }

    pub fn whitelist(&self) -> Vec<Address> {
        self.state().allocation.whitelist()
    }

    pub fn accumulator(&self, token: &TokenId) -> Option<RewardTokenState> {
        self.state().rewards.token_state(token).cloned()
    }

    pub fn vault_balance(&self, token: &TokenId) -> Amount {
        self.state().rewards.vault_balance(token)
    }

    pub fn active_orders(&self) -> Vec<SellOrder> {
        self.state().market.active_orders()
    }

    pub fn order(&self, order_id: OrderId) -> Result<SellOrder> {
        self.state().market.order(order_id).cloned()
    }

    pub fn schedules_of(&self, beneficiary: &Address) -> Vec<ScheduleView> {
        self.state().schedules_of(beneficiary, self.now())
    }

    pub fn beneficiaries(&self) -> Vec<Address> {
        self.state().vesting.beneficiaries()
    }

    pub fn total_vested(&self) -> Amount {
        self.state().vesting.total_vested()
    }

    pub fn mint_allowance(&self) -> Amount {
        let state = self.state();
        state.mint_guard.remaining(self.now(), state.genesis_time)
    }

    pub fn balance_of(&self, token: &TokenId, who: &Address) -> Amount {
        self.tokens.balance_of(token, who)
    }

    /// Compare vesting custody against what every schedule still owes.
    pub fn check_balance_sufficiency(&self) -> BalanceSufficiency {
        let state = self.state();
        let required = state.vesting.outstanding();
        let current = self
            .tokens
            .balance_of(&state.tokens.native, &state.accounts.vesting_custody);
        BalanceSufficiency {
            sufficient: current >= required,
            required,
            current,
        }
    }

    /// Compare grant custody against the unwithdrawn principal of every unit.
    pub fn check_grant_sufficiency(&self) -> BalanceSufficiency {
        let state = self.state();
        let required = state.units.outstanding_grants();
        let current = self
            .tokens
            .balance_of(&state.tokens.native, &state.accounts.grant_custody);
        BalanceSufficiency {
            sufficient: current >= required,
            required,
            current,
        }
    }

    /// Approve the engine custody to pull `amount` of `token` from `owner`.
    ///
    /// A convenience over the token collaborator, needed before `issue`,
    /// `buy` and non-native `distribute`.
    pub fn approve(&self, owner: Address, token: &TokenId, amount: Amount) -> Result<()> {
        let custody = self.custody_address();
        self.tokens.approve(token, owner, custody, amount)?;
        Ok(())
    }

    // ---------------------------------------------------------------------
    // Administration
    // ---------------------------------------------------------------------

    /// Set the reference time for unlocks, vesting and mint windows.
    ///
    /// Refused once schedules, unit withdrawals or windowed mints depend on it.
    pub fn set_genesis_time(
        &self,
        caller: Address,
        genesis: Timestamp,
    ) -> Result<Committed<()>> {
        self.transact("set_genesis_time", caller, |tx| {
            tx.state.access.require(&tx.caller, Capability::Admin)?;
            if genesis > tx.now {
                return Err(LedgerError::InvalidParameter(format!(
                    "genesis time {genesis} is in the future (now {})",
                    tx.now
                )));
            }
            let withdrawn = tx.state.units.iter().any(|u| u.unlocked_withdrawn > 0);
            if !tx.state.vesting.is_empty()
                || tx.state.mint_guard.has_post_genesis_mints()
                || withdrawn
            {
                return Err(LedgerError::WrongState {
                    entity: "genesis",
                    id: 0,
                    state: "already relied upon".into(),
                });
            }
            tx.state.genesis_time = Some(genesis);
            info!(target: "ledger", "Genesis time set to {}", genesis);
            Ok(())
        })
    }

    pub fn grant_capability(
        &self,
        caller: Address,
        who: Address,
        capability: Capability,
    ) -> Result<Committed<bool>> {
        self.transact("grant_capability", caller, |tx| {
            tx.state.access.require(&tx.caller, Capability::Admin)?;
            let added = tx.state.access.grant(who, capability);
            info!(target: "ledger", "Granted {:?} to {}", capability, who);
            Ok(added)
        })
    }

    pub fn revoke_capability(
        &self,
        caller: Address,
        who: Address,
        capability: Capability,
    ) -> Result<Committed<bool>> {
        self.transact("revoke_capability", caller, |tx| {
            tx.state.access.require(&tx.caller, Capability::Admin)?;
            let removed = tx.state.access.revoke(&who, capability)?;
            info!(target: "ledger", "Revoked {:?} from {}", capability, who);
            Ok(removed)
        })
    }

    pub fn set_treasury(&self, caller: Address, treasury: Address) -> Result<Committed<()>> {
        self.transact("set_treasury", caller, |tx| {
            tx.state.access.require(&tx.caller, Capability::Admin)?;
            tx.state.accounts.treasury = treasury;
            info!(target: "ledger", "Treasury set to {}", treasury);
            Ok(())
        })
    }

    pub fn set_external_share_recipient(
        &self,
        caller: Address,
        recipient: Address,
    ) -> Result<Committed<()>> {
        self.transact("set_external_share_recipient", caller, |tx| {
            tx.state.access.require(&tx.caller, Capability::Admin)?;
            tx.state.accounts.external_share_recipient = recipient;
            info!(target: "ledger", "External share recipient set to {}", recipient);
            Ok(())
        })
    }

    pub fn set_transfers_enabled(&self, caller: Address, enabled: bool) -> Result<Committed<()>> {
        self.transact("set_transfers_enabled", caller, |tx| {
            tx.state.access.require(&tx.caller, Capability::Operator)?;
            tx.state.market.set_transfers_enabled(enabled);
            info!(target: "ledger", "Unit transfers enabled: {}", enabled);
            Ok(())
        })
    }

    pub fn set_market_fee_bps(&self, caller: Address, fee_bps: u16) -> Result<Committed<()>> {
        self.transact("set_market_fee_bps", caller, |tx| {
            tx.state.access.require(&tx.caller, Capability::Operator)?;
            tx.state.market.set_fee_bps(fee_bps)?;
            info!(target: "ledger", "Market fee set to {} bps", fee_bps);
            Ok(())
        })
    }

    // ---------------------------------------------------------------------
    // Allocation
    // ---------------------------------------------------------------------

    pub fn add_to_whitelist(
        &self,
        caller: Address,
        addresses: &[Address],
    ) -> Result<Committed<usize>> {
        self.transact("add_to_whitelist", caller, |tx| {
            tx.state.access.require(&tx.caller, Capability::Operator)?;
            let added = tx.state.allocation.add_to_whitelist(addresses);
            info!(
                target: "ledger",
                "Whitelisted {} new of {} addresses ({} total)",
                added,
                addresses.len(),
                tx.state.allocation.whitelist_len()
            );
            Ok(added)
        })
    }

    pub fn remove_from_whitelist(
        &self,
        caller: Address,
        address: Address,
    ) -> Result<Committed<bool>> {
        self.transact("remove_from_whitelist", caller, |tx| {
            tx.state.access.require(&tx.caller, Capability::Operator)?;
            let removed = tx.state.allocation.remove_from_whitelist(&address);
            if removed {
                info!(target: "ledger", "Removed {} from whitelist", address);
            }
            Ok(removed)
        })
    }

    pub fn create_batch(
        &self,
        caller: Address,
        max_issuable: u32,
        unit_price: Amount,
    ) -> Result<Committed<BatchId>> {
        self.transact("create_batch", caller, |tx| {
            tx.state.access.require(&tx.caller, Capability::Operator)?;
            let batch_id = tx
                .state
                .allocation
                .create_batch(max_issuable, unit_price, tx.now)?;
            info!(
                target: "ledger",
                "Batch {} created: {} units at {} each, {} unallocated",
                batch_id,
                max_issuable,
                unit_price,
                tx.state.allocation.unallocated()
            );
            Ok(batch_id)
        })
    }

    pub fn activate_batch(&self, caller: Address, batch_id: BatchId) -> Result<Committed<()>> {
        self.transact("activate_batch", caller, |tx| {
            tx.state.access.require(&tx.caller, Capability::Operator)?;
            tx.state.allocation.activate_batch(batch_id)?;
            info!(target: "ledger", "Batch {} activated", batch_id);
            Ok(())
        })
    }

    /// Issue the next unit to a whitelisted caller, charging the batch price.
    pub fn issue(&self, caller: Address) -> Result<Committed<UnitId>> {
        self.transact("issue", caller, |tx| {
            let state = &mut tx.state;
            let ticket = state
                .allocation
                .reserve_issue(&tx.caller, state.rewards.global.total_issued)?;

            tx.transfers.push_transfer_from(
                &state.tokens.payment,
                tx.caller,
                state.accounts.custody,
                state.accounts.treasury,
                ticket.unit_price,
            );

            let unit_id = state.units.next_id();
            let position = state.rewards.register_unit();
            state.units.insert(
                crate::units::Unit::new(
                    unit_id,
                    ticket.batch_id,
                    state.params.unit_grant,
                    tx.now,
                    position,
                ),
                tx.caller,
            );

            info!(
                target: "ledger",
                "Unit {} issued to {} from batch {} ({} of {} issued)",
                unit_id,
                tx.caller,
                ticket.batch_id,
                state.rewards.global.total_issued,
                state.params.max_supply
            );
            Ok(unit_id)
        })
    }

    // ---------------------------------------------------------------------
    // Rewards
    // ---------------------------------------------------------------------

    /// Distribute `amount` of `token` across every slot.
    ///
    /// The native token is minted into custody through the mint guard; any
    /// other token is pulled from the caller (prior approval to custody).
    pub fn distribute(
        &self,
        caller: Address,
        token: &TokenId,
        amount: Amount,
    ) -> Result<Committed<DistributionResult>> {
        self.transact("distribute", caller, |tx| {
            let state = &mut tx.state;
            state.access.require(&tx.caller, Capability::Distributor)?;
            let custody = state.accounts.custody;

            if state.rewards.is_native(token) {
                state.mint_guard.try_mint(amount, tx.now, state.genesis_time)?;
                tx.transfers.push_mint(token, custody, amount);
            } else {
                tx.transfers
                    .push_transfer_from(token, tx.caller, custody, custody, amount);
            }

            let result = state.rewards.distribute(token, amount, tx.now)?;
            tx.transfers.push_transfer(
                token,
                custody,
                state.accounts.external_share_recipient,
                result.external_share,
            );

            info!(
                target: "ledger",
                "Distributed {} {}: unit share {}, external {}, per unit {}, vault +{}",
                amount,
                token,
                result.unit_share,
                result.external_share,
                result.per_unit_delta,
                result.vault_delta
            );
            Ok(result)
        })
    }

    /// Mint native tokens outside a distribution (e.g. to fund grant custody).
    pub fn mint_native(
        &self,
        caller: Address,
        to: Address,
        amount: Amount,
    ) -> Result<Committed<()>> {
        self.transact("mint_native", caller, |tx| {
            let state = &mut tx.state;
            state.access.require(&tx.caller, Capability::Distributor)?;
            state.mint_guard.try_mint(amount, tx.now, state.genesis_time)?;
            tx.transfers.push_mint(&state.tokens.native, to, amount);
            info!(target: "ledger", "Minted {} {} to {}", amount, state.tokens.native, to);
            Ok(())
        })
    }

    /// Report native burns observed on the token side (feeds the tail mint cap).
    pub fn record_burn(&self, caller: Address, amount: Amount) -> Result<Committed<()>> {
        self.transact("record_burn", caller, |tx| {
            let state = &mut tx.state;
            state.access.require(&tx.caller, Capability::Distributor)?;
            if amount == 0 {
                return Err(LedgerError::InvalidAmount("burn amount must be positive"));
            }
            state.mint_guard.record_burn(amount, tx.now, state.genesis_time);
            debug!(target: "ledger", "Recorded burn of {}", amount);
            Ok(())
        })
    }

    /// Claim `token` rewards for a unit. Zero is a valid outcome.
    pub fn claim(
        &self,
        caller: Address,
        unit_id: UnitId,
        token: &TokenId,
    ) -> Result<Committed<Amount>> {
        self.transact("claim", caller, |tx| {
            let state = &mut tx.state;
            state.units.require_owner(&tx.caller, unit_id)?;
            let unit = state.units.get_mut(unit_id)?;
            let amount = state.rewards.claim(&mut unit.rewards, token);

            if amount == 0 {
                debug!(target: "ledger", "Unit {}: nothing pending in {}", unit_id, token);
            } else {
                tx.transfers
                    .push_transfer(token, state.accounts.custody, tx.caller, amount);
                info!(target: "ledger", "Unit {} claimed {} {}", unit_id, amount, token);
            }
            Ok(amount)
        })
    }

    /// Claim every known token for a unit; returns the non-zero claims.
    pub fn claim_all(
        &self,
        caller: Address,
        unit_id: UnitId,
    ) -> Result<Committed<Vec<(TokenId, Amount)>>> {
        self.transact("claim_all", caller, |tx| {
            let state = &mut tx.state;
            state.units.require_owner(&tx.caller, unit_id)?;
            let unit = state.units.get_mut(unit_id)?;

            let mut claimed = Vec::new();
            for token in state.rewards.known_tokens() {
                let amount = state.rewards.claim(&mut unit.rewards, &token);
                if amount > 0 {
                    tx.transfers
                        .push_transfer(&token, state.accounts.custody, tx.caller, amount);
                    claimed.push((token, amount));
                }
            }
            info!(
                target: "ledger",
                "Unit {} claimed {} token(s)",
                unit_id,
                claimed.len()
            );
            Ok(claimed)
        })
    }

    /// Move the vault balance of `token` to the treasury.
    pub fn extract_vault(&self, caller: Address, token: &TokenId) -> Result<Committed<Amount>> {
        self.transact("extract_vault", caller, |tx| {
            let state = &mut tx.state;
            state.access.require(&tx.caller, Capability::Operator)?;
            let amount = state.rewards.extract_vault(token);
            tx.transfers
                .push_transfer(token, state.accounts.custody, state.accounts.treasury, amount);
            if amount == 0 {
                debug!(target: "ledger", "Vault of {} already empty", token);
            }
            Ok(amount)
        })
    }

    // ---------------------------------------------------------------------
    // Unit lifecycle
    // ---------------------------------------------------------------------

    pub fn initiate_termination(&self, caller: Address, unit_id: UnitId) -> Result<Committed<()>> {
        self.transact("initiate_termination", caller, |tx| {
            tx.state.units.require_owner(&tx.caller, unit_id)?;
            tx.state.units.get_mut(unit_id)?.initiate_termination(tx.now)?;
            info!(target: "ledger", "Unit {} termination initiated", unit_id);
            Ok(())
        })
    }

    pub fn cancel_termination(&self, caller: Address, unit_id: UnitId) -> Result<Committed<()>> {
        self.transact("cancel_termination", caller, |tx| {
            tx.state.units.require_owner(&tx.caller, unit_id)?;
            tx.state.units.get_mut(unit_id)?.cancel_termination()?;
            info!(target: "ledger", "Unit {} termination cancelled", unit_id);
            Ok(())
        })
    }

    /// Finish a termination after the cooldown; pending rewards are settled
    /// and the slot's future share goes to the vault.
    pub fn confirm_termination(&self, caller: Address, unit_id: UnitId) -> Result<Committed<()>> {
        self.transact("confirm_termination", caller, |tx| {
            let state = &mut tx.state;
            state.units.require_owner(&tx.caller, unit_id)?;
            let cooldown = state.params.termination_cooldown;
            let unit = state.units.get_mut(unit_id)?;
            unit.confirm_termination(tx.now, cooldown)?;
            state.rewards.retire(&mut unit.rewards);
            info!(
                target: "ledger",
                "Unit {} terminated ({} units still participating)",
                unit_id,
                state.rewards.global.participating()
            );
            Ok(())
        })
    }

    /// Withdraw the unlocked part of a unit's grant to its owner.
    ///
    /// Paid from grant custody only; reward custody is never drawn on.
    pub fn withdraw_unlocked(&self, caller: Address, unit_id: UnitId) -> Result<Committed<Amount>> {
        self.transact("withdraw_unlocked", caller, |tx| {
            let state = &mut tx.state;
            state.units.require_owner(&tx.caller, unit_id)?;
            let schedule = state.unlock_schedule();
            let genesis = state.genesis_time;
            let amount = state
                .units
                .get_mut(unit_id)?
                .take_withdrawable(&schedule, tx.now, genesis)?;
            tx.transfers.push_transfer(
                &state.tokens.native,
                state.accounts.grant_custody,
                tx.caller,
                amount,
            );
            info!(target: "ledger", "Unit {} withdrew {} unlocked", unit_id, amount);
            Ok(amount)
        })
    }

    // ---------------------------------------------------------------------
    // Transfers and marketplace
    // ---------------------------------------------------------------------

    pub fn transfer_unit(
        &self,
        caller: Address,
        unit_id: UnitId,
        to: Address,
    ) -> Result<Committed<()>> {
        self.transact("transfer_unit", caller, |tx| {
            let state = &mut tx.state;
            if !state.market.transfers_enabled() {
                return Err(LedgerError::TransfersDisabled);
            }
            state.units.require_owner(&tx.caller, unit_id)?;
            if to == tx.caller || to == state.accounts.custody {
                return Err(LedgerError::InvalidParameter(format!(
                    "cannot transfer unit {unit_id} to {to}"
                )));
            }
            state.units.set_owner(unit_id, to)?;
            info!(target: "ledger", "Unit {} transferred {} -> {}", unit_id, tx.caller, to);
            Ok(())
        })
    }

    /// List an active unit for sale; the unit moves into escrow.
    pub fn create_sell_order(
        &self,
        caller: Address,
        unit_id: UnitId,
        price: Amount,
    ) -> Result<Committed<OrderId>> {
        self.transact("create_sell_order", caller, |tx| {
            let state = &mut tx.state;
            state.units.require_owner(&tx.caller, unit_id)?;
            let status = state.units.get(unit_id)?.status;
            if status != UnitStatus::Active {
                return Err(LedgerError::wrong_state("unit", unit_id, status));
            }
            let order_id = state
                .market
                .create_order(unit_id, tx.caller, price, tx.now)?;
            state.units.set_owner(unit_id, state.accounts.custody)?;
            info!(
                target: "ledger",
                "Order {} lists unit {} at {}",
                order_id,
                unit_id,
                price
            );
            Ok(order_id)
        })
    }

    pub fn buy(&self, caller: Address, order_id: OrderId) -> Result<Committed<Settlement>> {
        self.transact("buy", caller, |tx| {
            let state = &mut tx.state;
            let settlement = state.market.fill(order_id, tx.caller, tx.now)?;
            let payment = &state.tokens.payment;
            let custody = state.accounts.custody;

            tx.transfers.push_transfer_from(
                payment,
                tx.caller,
                custody,
                settlement.seller,
                settlement.seller_proceeds,
            );
            tx.transfers.push_transfer_from(
                payment,
                tx.caller,
                custody,
                state.accounts.treasury,
                settlement.fee,
            );
            state.units.set_owner(settlement.unit_id, tx.caller)?;

            info!(
                target: "ledger",
                "Order {} filled: unit {} to {} for {} (fee {})",
                order_id,
                settlement.unit_id,
                tx.caller,
                settlement.price,
                settlement.fee
            );
            Ok(settlement)
        })
    }

    pub fn cancel_sell_order(&self, caller: Address, order_id: OrderId) -> Result<Committed<()>> {
        self.transact("cancel_sell_order", caller, |tx| {
            let unit_id = tx.state.market.cancel(order_id, &tx.caller, tx.now)?;
            tx.state.units.set_owner(unit_id, tx.caller)?;
            info!(target: "ledger", "Order {} cancelled, unit {} returned", order_id, unit_id);
            Ok(())
        })
    }

    // ---------------------------------------------------------------------
    // General vesting
    // ---------------------------------------------------------------------

    pub fn create_schedule(
        &self,
        caller: Address,
        request: ScheduleRequest,
    ) -> Result<Committed<ScheduleId>> {
        self.transact("create_schedule", caller, |tx| {
            let state = &mut tx.state;
            state.access.require(&tx.caller, Capability::VestingAdmin)?;
            let schedule_id = state.vesting.create(&request, state.genesis_time, tx.now)?;
            info!(
                target: "ledger",
                "Vesting schedule {} for {}: {} over {}s after {}s lock",
                schedule_id,
                request.beneficiary,
                request.total_amount,
                request.release_duration,
                request.lock_period
            );
            Ok(schedule_id)
        })
    }

    /// Create several schedules; any invalid request rejects the whole set.
    pub fn create_schedules_batch(
        &self,
        caller: Address,
        requests: &[ScheduleRequest],
    ) -> Result<Committed<Vec<ScheduleId>>> {
        self.transact("create_schedules_batch", caller, |tx| {
            let state = &mut tx.state;
            state.access.require(&tx.caller, Capability::VestingAdmin)?;
            if requests.is_empty() {
                return Err(LedgerError::InvalidParameter("no schedules given".into()));
            }
            let ids = requests
                .iter()
                .map(|request| state.vesting.create(request, state.genesis_time, tx.now))
                .collect::<Result<Vec<_>>>()?;
            info!(target: "ledger", "Created {} vesting schedules", ids.len());
            Ok(ids)
        })
    }

    fn pay_releases(tx: &mut Transaction, releases: &[Release]) {
        for release in releases {
            tx.transfers.push_transfer(
                &tx.state.tokens.native,
                tx.state.accounts.vesting_custody,
                release.beneficiary,
                release.amount,
            );
            info!(
                target: "ledger",
                "Schedule {} released {} to {}",
                release.schedule_id,
                release.amount,
                release.beneficiary
            );
        }
    }

    fn require_beneficiary_or_admin(tx: &Transaction, beneficiary: &Address) -> Result<()> {
        if tx.caller == *beneficiary {
            Ok(())
        } else {
            tx.state.access.require(&tx.caller, Capability::VestingAdmin)
        }
    }

    /// Release one schedule; callable by its beneficiary or a vesting admin.
    pub fn release(&self, caller: Address, schedule_id: ScheduleId) -> Result<Committed<Release>> {
        self.transact("release", caller, |tx| {
            let beneficiary = tx.state.vesting.get(schedule_id)?.beneficiary;
            Self::require_beneficiary_or_admin(tx, &beneficiary)?;
            let release = tx.state.vesting.release(schedule_id, tx.now)?;
            Self::pay_releases(tx, std::slice::from_ref(&release));
            Ok(release)
        })
    }

    pub fn release_all(
        &self,
        caller: Address,
        beneficiary: Address,
    ) -> Result<Committed<Vec<Release>>> {
        self.transact("release_all", caller, |tx| {
            Self::require_beneficiary_or_admin(tx, &beneficiary)?;
            let releases = tx.state.vesting.release_all(&beneficiary, tx.now)?;
            Self::pay_releases(tx, &releases);
            Ok(releases)
        })
    }

    /// Release every listed schedule with something releasable.
    pub fn release_batch(
        &self,
        caller: Address,
        schedule_ids: &[ScheduleId],
    ) -> Result<Committed<Vec<Release>>> {
        self.transact("release_batch", caller, |tx| {
            tx.state.access.require(&tx.caller, Capability::VestingAdmin)?;
            let releases = tx.state.vesting.release_many(schedule_ids, tx.now)?;
            Self::pay_releases(tx, &releases);
            Ok(releases)
        })
    }
}
