//! Unitvault ledger engine
//!
//! Deterministic accounting for a fixed pool of numbered units:
//! - batch-gated issuance against a fixed supply (`allocation`)
//! - reward-per-slot accumulators with a vault for unissued slots (`rewards`)
//! - per-unit locked grants with stepped unlocks (`units`, `unlock`)
//! - an escrow marketplace (`marketplace`)
//! - general linear vesting schedules (`vesting`)
//! - a capped native mint allowance (`allowance`)
//!
//! All mutations go through [`Engine`], which runs each operation as a
//! serialized, all-or-nothing critical section against a working copy of
//! [`LedgerState`] and a single batch of token movements.

pub mod access;
pub mod allocation;
pub mod allowance;
pub mod engine;
pub mod errors;
pub mod marketplace;
pub mod params;
pub mod rewards;
pub mod state;
pub mod token_ledger;
pub mod transaction;
pub mod units;
pub mod unlock;
pub mod vesting;

pub use access::{AccessTable, Capability};
pub use allocation::{AllocationManager, Batch};
pub use allowance::{MintAllowanceGuard, MintWindow};
pub use engine::Engine;
pub use errors::{ErrorKind, LedgerError, Result};
pub use marketplace::{Marketplace, OrderStatus, SellOrder, Settlement};
pub use params::{
    AccountsConfig, CapabilityGrant, EngineConfig, LedgerParams, MintTailPolicy, TokensConfig,
};
pub use rewards::{DistributionResult, GlobalState, RewardLedger, RewardPosition, RewardTokenState};
pub use state::{BalanceSufficiency, LedgerSnapshot, LedgerState, ScheduleView, UnitView};
pub use token_ledger::{
    InMemoryTokenLedger, MockHandle, MockTokenLedger, TokenError, TokenLedger, TokenOp,
    TransferBatch, TransferReceipt,
};
pub use transaction::{Committed, Transaction};
pub use units::{Unit, UnitRegistry, UnitStatus};
pub use unlock::{linear_release, unlocked_fraction, Fraction, UnlockSchedule};
pub use vesting::{Release, ScheduleRequest, VestingSchedule, VestingScheduler};
