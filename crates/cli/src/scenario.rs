//! JSON scenarios replayed against an in-memory ledger.
//!
//! Accounts in a scenario are written as `u`-prefixed addresses, as one of the
//! configured roles (`admin`, `treasury`, `external`, `custody`,
//! `grant_custody`, `vesting_custody`) or as any other label, which is
//! turned into a derived address.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::debug;
use unitvault_ledger::{
    Capability, Committed, Engine, EngineConfig, InMemoryTokenLedger, LedgerError,
    ScheduleRequest,
};
use unitvault_types::{
    amount_serde, Address, Amount, BatchId, ManualClock, OrderId, ScheduleId, Timestamp, TokenId,
    UnitId,
};

const DEFAULT_START_TIME: Timestamp = 1_700_000_000;

#[derive(Debug, Deserialize)]
pub struct Scenario {
    /// Clock reading before the first step.
    #[serde(default)]
    pub start_time: Option<Timestamp>,
    pub steps: Vec<Step>,
}

/// A script is either a bare array of steps or an object with a start time.
#[derive(Deserialize)]
#[serde(untagged)]
enum ScriptFile {
    Steps(Vec<Step>),
    Full(Scenario),
}

impl Scenario {
    pub fn from_json(raw: &str) -> serde_json::Result<Self> {
        Ok(match serde_json::from_str(raw)? {
            ScriptFile::Steps(steps) => Scenario {
                start_time: None,
                steps,
            },
            ScriptFile::Full(scenario) => scenario,
        })
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Step {
    AdvanceTime {
        seconds: Timestamp,
    },
    SetGenesis {
        caller: String,
        /// Defaults to the current clock reading.
        #[serde(default)]
        at: Option<Timestamp>,
    },
    Grant {
        caller: String,
        who: String,
        capability: Capability,
    },
    Whitelist {
        caller: String,
        addresses: Vec<String>,
    },
    CreateBatch {
        caller: String,
        max_issuable: u32,
        #[serde(with = "amount_serde")]
        unit_price: Amount,
    },
    ActivateBatch {
        caller: String,
        batch_id: BatchId,
    },
    SetTransfers {
        caller: String,
        enabled: bool,
    },
    SetMarketFee {
        caller: String,
        fee_bps: u16,
    },
    /// Credit tokens directly on the in-memory token ledger.
    Fund {
        who: String,
        #[serde(default)]
        token: Option<String>,
        #[serde(with = "amount_serde")]
        amount: Amount,
    },
    /// Approve the engine custody to pull tokens from `who`.
    Approve {
        who: String,
        #[serde(default)]
        token: Option<String>,
        #[serde(with = "amount_serde")]
        amount: Amount,
    },
    Issue {
        caller: String,
    },
    Distribute {
        caller: String,
        #[serde(default)]
        token: Option<String>,
        #[serde(with = "amount_serde")]
        amount: Amount,
    },
    MintNative {
        caller: String,
        to: String,
        #[serde(with = "amount_serde")]
        amount: Amount,
    },
    Claim {
        caller: String,
        unit_id: UnitId,
        #[serde(default)]
        token: Option<String>,
    },
    ClaimAll {
        caller: String,
        unit_id: UnitId,
    },
    ExtractVault {
        caller: String,
        #[serde(default)]
        token: Option<String>,
    },
    InitiateTermination {
        caller: String,
        unit_id: UnitId,
    },
    CancelTermination {
        caller: String,
        unit_id: UnitId,
    },
    ConfirmTermination {
        caller: String,
        unit_id: UnitId,
    },
    WithdrawUnlocked {
        caller: String,
        unit_id: UnitId,
    },
    TransferUnit {
        caller: String,
        unit_id: UnitId,
        to: String,
    },
    CreateSellOrder {
        caller: String,
        unit_id: UnitId,
        #[serde(with = "amount_serde")]
        price: Amount,
    },
    Buy {
        caller: String,
        order_id: OrderId,
    },
    CancelSellOrder {
        caller: String,
        order_id: OrderId,
    },
    CreateSchedule {
        caller: String,
        beneficiary: String,
        #[serde(with = "amount_serde")]
        total_amount: Amount,
        lock_period: Timestamp,
        release_duration: Timestamp,
    },
    Release {
        caller: String,
        schedule_id: ScheduleId,
    },
    ReleaseAll {
        caller: String,
        beneficiary: String,
    },
    /// Print the unit view of one unit.
    ShowUnit {
        unit_id: UnitId,
    },
}

impl Step {
    fn name(&self) -> &'static str {
        match self {
            Step::AdvanceTime { .. } => "advance_time",
            Step::SetGenesis { .. } => "set_genesis",
            Step::Grant { .. } => "grant",
            Step::Whitelist { .. } => "whitelist",
            Step::CreateBatch { .. } => "create_batch",
            Step::ActivateBatch { .. } => "activate_batch",
            Step::SetTransfers { .. } => "set_transfers",
            Step::SetMarketFee { .. } => "set_market_fee",
            Step::Fund { .. } => "fund",
            Step::Approve { .. } => "approve",
            Step::Issue { .. } => "issue",
            Step::Distribute { .. } => "distribute",
            Step::MintNative { .. } => "mint_native",
            Step::Claim { .. } => "claim",
            Step::ClaimAll { .. } => "claim_all",
            Step::ExtractVault { .. } => "extract_vault",
            Step::InitiateTermination { .. } => "initiate_termination",
            Step::CancelTermination { .. } => "cancel_termination",
            Step::ConfirmTermination { .. } => "confirm_termination",
            Step::WithdrawUnlocked { .. } => "withdraw_unlocked",
            Step::TransferUnit { .. } => "transfer_unit",
            Step::CreateSellOrder { .. } => "create_sell_order",
            Step::Buy { .. } => "buy",
            Step::CancelSellOrder { .. } => "cancel_sell_order",
            Step::CreateSchedule { .. } => "create_schedule",
            Step::Release { .. } => "release",
            Step::ReleaseAll { .. } => "release_all",
            Step::ShowUnit { .. } => "show_unit",
        }
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Summary {
    pub committed: usize,
    pub rejected: usize,
    pub sequence: u64,
}

enum Outcome {
    Committed,
    Rejected,
    Local,
}

pub struct Simulation {
    engine: Engine,
    tokens: InMemoryTokenLedger,
    clock: Arc<ManualClock>,
    config: EngineConfig,
}

impl Simulation {
    pub fn new(config: EngineConfig, start_time: Option<Timestamp>) -> Result<Self> {
        let start = start_time
            .or(config.genesis_time)
            .unwrap_or(DEFAULT_START_TIME)
            .max(config.genesis_time.unwrap_or(0));
        let tokens = InMemoryTokenLedger::new();
        let clock = Arc::new(ManualClock::new(start));
        let engine = Engine::new(config.clone(), Arc::new(tokens.clone()), clock.clone())
            .context("failed to start engine")?;
        Ok(Self {
            engine,
            tokens,
            clock,
            config,
        })
    }

    pub fn engine(&self) -> &Engine {
        &self.engine
    }

    /// Resolve a scenario account reference.
    pub fn resolve(&self, reference: &str) -> Address {
        match reference {
            "admin" => self.config.accounts.admin,
            "treasury" => self.engine.state().accounts.treasury,
            "external" => self.engine.state().accounts.external_share_recipient,
            "custody" => self.engine.custody_address(),
            "grant_custody" => self.engine.grant_custody_address(),
            "vesting_custody" => self.engine.vesting_custody_address(),
            other => other
                .parse::<Address>()
                .unwrap_or_else(|_| Address::derive(other)),
        }
    }

    fn token_or(&self, token: &Option<String>, fallback: TokenId) -> TokenId {
        token.as_deref().map(TokenId::new).unwrap_or(fallback)
    }

    pub fn run(&mut self, steps: &[Step], strict: bool) -> Result<Summary> {
        let mut summary = Summary::default();
        for (index, step) in steps.iter().enumerate() {
            match self.apply(index, step)? {
                Outcome::Committed => summary.committed += 1,
                Outcome::Rejected => {
                    summary.rejected += 1;
                    if strict {
                        break;
                    }
                }
                Outcome::Local => {}
            }
        }
        summary.sequence = self.engine.state().sequence;
        Ok(summary)
    }

    fn apply(&self, index: usize, step: &Step) -> Result<Outcome> {
        debug!(target: "unitvault", "step {}: {:?}", index, step);
        let engine = &self.engine;
        let name = step.name();
        let native = engine.native_token();
        let payment = engine.payment_token();

        let outcome = match step {
            Step::AdvanceTime { seconds } => {
                let now = self.clock.advance(*seconds);
                println!("[{index:>3}] {name:<22} now {now}");
                Outcome::Local
            }
            Step::SetGenesis { caller, at } => {
                let at = at.unwrap_or_else(|| engine.now());
                report(index, name, engine.set_genesis_time(self.resolve(caller), at))?
            }
            Step::Grant {
                caller,
                who,
                capability,
            } => report(
                index,
                name,
                engine.grant_capability(self.resolve(caller), self.resolve(who), *capability),
            )?,
            Step::Whitelist { caller, addresses } => {
                let addresses: Vec<Address> = addresses.iter().map(|a| self.resolve(a)).collect();
                report(
                    index,
                    name,
                    engine.add_to_whitelist(self.resolve(caller), &addresses),
                )?
            }
            Step::CreateBatch {
                caller,
                max_issuable,
                unit_price,
            } => report(
                index,
                name,
                engine.create_batch(self.resolve(caller), *max_issuable, *unit_price),
            )?,
            Step::ActivateBatch { caller, batch_id } => report(
                index,
                name,
                engine.activate_batch(self.resolve(caller), *batch_id),
            )?,
            Step::SetTransfers { caller, enabled } => report(
                index,
                name,
                engine.set_transfers_enabled(self.resolve(caller), *enabled),
            )?,
            Step::SetMarketFee { caller, fee_bps } => report(
                index,
                name,
                engine.set_market_fee_bps(self.resolve(caller), *fee_bps),
            )?,
            Step::Fund { who, token, amount } => {
                let token = self.token_or(token, payment);
                let who = self.resolve(who);
                self.tokens
                    .credit(&token, who, *amount)
                    .with_context(|| format!("step {index}: funding {who} failed"))?;
                println!("[{index:>3}] {name:<22} {amount} {token} to {who}");
                Outcome::Local
            }
            Step::Approve { who, token, amount } => {
                let token = self.token_or(token, payment);
                let who = self.resolve(who);
                engine
                    .approve(who, &token, *amount)
                    .with_context(|| format!("step {index}: approval by {who} failed"))?;
                println!("[{index:>3}] {name:<22} {amount} {token} from {who}");
                Outcome::Local
            }
            Step::Issue { caller } => report(index, name, engine.issue(self.resolve(caller)))?,
            Step::Distribute {
                caller,
                token,
                amount,
            } => {
                let token = self.token_or(token, native);
                report(
                    index,
                    name,
                    engine.distribute(self.resolve(caller), &token, *amount),
                )?
            }
            Step::MintNative { caller, to, amount } => report(
                index,
                name,
                engine.mint_native(self.resolve(caller), self.resolve(to), *amount),
            )?,
            Step::Claim {
                caller,
                unit_id,
                token,
            } => {
                let token = self.token_or(token, native);
                report(
                    index,
                    name,
                    engine.claim(self.resolve(caller), *unit_id, &token),
                )?
            }
            Step::ClaimAll { caller, unit_id } => report(
                index,
                name,
                engine.claim_all(self.resolve(caller), *unit_id),
            )?,
            Step::ExtractVault { caller, token } => {
                let token = self.token_or(token, native);
                report(index, name, engine.extract_vault(self.resolve(caller), &token))?
            }
            Step::InitiateTermination { caller, unit_id } => report(
                index,
                name,
                engine.initiate_termination(self.resolve(caller), *unit_id),
            )?,
            Step::CancelTermination { caller, unit_id } => report(
                index,
                name,
                engine.cancel_termination(self.resolve(caller), *unit_id),
            )?,
            Step::ConfirmTermination { caller, unit_id } => report(
                index,
                name,
                engine.confirm_termination(self.resolve(caller), *unit_id),
            )?,
            Step::WithdrawUnlocked { caller, unit_id } => report(
                index,
                name,
                engine.withdraw_unlocked(self.resolve(caller), *unit_id),
            )?,
            Step::TransferUnit {
                caller,
                unit_id,
                to,
            } => report(
                index,
                name,
                engine.transfer_unit(self.resolve(caller), *unit_id, self.resolve(to)),
            )?,
            Step::CreateSellOrder {
                caller,
                unit_id,
                price,
            } => report(
                index,
                name,
                engine.create_sell_order(self.resolve(caller), *unit_id, *price),
            )?,
            Step::Buy { caller, order_id } => {
                report(index, name, engine.buy(self.resolve(caller), *order_id))?
            }
            Step::CancelSellOrder { caller, order_id } => report(
                index,
                name,
                engine.cancel_sell_order(self.resolve(caller), *order_id),
            )?,
            Step::CreateSchedule {
                caller,
                beneficiary,
                total_amount,
                lock_period,
                release_duration,
            } => {
                let request = ScheduleRequest {
                    beneficiary: self.resolve(beneficiary),
                    total_amount: *total_amount,
                    lock_period: *lock_period,
                    release_duration: *release_duration,
                };
                report(
                    index,
                    name,
                    engine.create_schedule(self.resolve(caller), request),
                )?
            }
            Step::Release {
                caller,
                schedule_id,
            } => report(
                index,
                name,
                engine.release(self.resolve(caller), *schedule_id),
            )?,
            Step::ReleaseAll {
                caller,
                beneficiary,
            } => report(
                index,
                name,
                engine.release_all(self.resolve(caller), self.resolve(beneficiary)),
            )?,
            Step::ShowUnit { unit_id } => {
                match engine.unit_view(*unit_id) {
                    Ok(view) => println!(
                        "[{index:>3}] {name:<22} {}",
                        serde_json::to_string(&view)?
                    ),
                    Err(err) => println!("[{index:>3}] {name:<22} {err}"),
                }
                Outcome::Local
            }
        };
        Ok(outcome)
    }
}

/// Print one engine outcome; ledger rejections are reported, not propagated.
fn report<T: Serialize>(
    index: usize,
    name: &str,
    result: std::result::Result<Committed<T>, LedgerError>,
) -> Result<Outcome> {
    match result {
        Ok(committed) => {
            println!(
                "[{index:>3}] {name:<22} ✓ seq {} ref {} {}",
                committed.sequence,
                &committed.reference[..16],
                serde_json::to_string(&committed.value)?
            );
            Ok(Outcome::Committed)
        }
        Err(err) => {
            println!("[{index:>3}] {name:<22} ✗ {:?}: {}", err.kind(), err);
            Ok(Outcome::Rejected)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> EngineConfig {
        EngineConfig::new(
            Address::derive("admin"),
            Address::derive("treasury"),
            Address::derive("multisig"),
        )
    }

    #[test]
    fn test_resolve_roles_labels_and_addresses() {
        let sim = Simulation::new(config(), None).unwrap();
        assert_eq!(sim.resolve("admin"), Address::derive("admin"));
        assert_eq!(sim.resolve("external"), Address::derive("multisig"));
        assert_ne!(sim.resolve("grant_custody"), sim.resolve("custody"));
        assert_eq!(sim.resolve("alice"), Address::derive("alice"));
        let literal = Address::derive("bob").to_string();
        assert_eq!(sim.resolve(&literal), Address::derive("bob"));
    }

    #[test]
    fn test_scenario_runs_and_counts_rejections() {
        let raw = r#"{
            "start_time": 1700000000,
            "steps": [
                {"op": "whitelist", "caller": "admin", "addresses": ["alice"]},
                {"op": "create_batch", "caller": "admin", "max_issuable": 10, "unit_price": 0},
                {"op": "issue", "caller": "alice"},
                {"op": "issue", "caller": "mallory"},
                {"op": "grant", "caller": "admin", "who": "oracle", "capability": "distributor"},
                {"op": "distribute", "caller": "oracle", "amount": 50000},
                {"op": "claim", "caller": "alice", "unit_id": 1},
                {"op": "advance_time", "seconds": 60},
                {"op": "initiate_termination", "caller": "alice", "unit_id": 1},
                {"op": "confirm_termination", "caller": "alice", "unit_id": 1}
            ]
        }"#;
        let scenario = Scenario::from_json(raw).unwrap();
        let mut sim = Simulation::new(config(), scenario.start_time).unwrap();
        let summary = sim.run(&scenario.steps, false).unwrap();

        assert_eq!(summary.committed, 7);
        assert_eq!(summary.rejected, 2);
        assert_eq!(summary.sequence, 7);
        let alice = Address::derive("alice");
        assert_eq!(sim.engine().balance_of(&sim.engine().native_token(), &alice), 8);
    }

    #[test]
    fn test_strict_run_stops_at_first_rejection() {
        let scenario = Scenario::from_json(
            r#"[
                {"op": "issue", "caller": "alice"},
                {"op": "create_batch", "caller": "admin", "max_issuable": 10, "unit_price": "0"}
            ]"#,
        )
        .unwrap();
        assert_eq!(scenario.start_time, None);
        let mut sim = Simulation::new(config(), None).unwrap();
        let summary = sim.run(&scenario.steps, true).unwrap();
        assert_eq!(summary.rejected, 1);
        assert_eq!(summary.committed, 0);
        assert!(sim.engine().batches().is_empty());
    }
}
