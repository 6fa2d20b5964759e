//! Native token mint allowance
//!
//! Before genesis, minting is bounded by a one-off initial supply ceiling.
//! After genesis, time is cut into fixed windows aligned on
//! `genesis + k * window_length` and each window has its own cap.

use crate::errors::{LedgerError, Result};
use crate::params::{LedgerParams, MintTailPolicy};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::{debug, warn};
use unitvault_types::{Amount, Timestamp};

/// The window currently being filled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MintWindow {
    pub window_index: u64,
    pub window_start: Timestamp,
    #[serde(with = "unitvault_types::amount_serde")]
    pub minted_in_window: Amount,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MintAllowanceGuard {
    yearly_cap: Amount,
    initial_supply_ceiling: Amount,
    window_length: Timestamp,
    tail: Option<MintTailPolicy>,
    pre_genesis_minted: Amount,
    window: Option<MintWindow>,
    /// window index → amount burned during that window
    burned_by_window: BTreeMap<u64, Amount>,
    total_minted: Amount,
    total_burned: Amount,
}

impl MintAllowanceGuard {
    pub fn new(params: &LedgerParams) -> Self {
        Self {
            yearly_cap: params.yearly_mint_cap,
            initial_supply_ceiling: params.initial_supply_ceiling,
            window_length: params.mint_window_length,
            tail: params.mint_tail.clone(),
            pre_genesis_minted: 0,
            window: None,
            burned_by_window: BTreeMap::new(),
            total_minted: 0,
            total_burned: 0,
        }
    }

    fn window_at(&self, now: Timestamp, genesis: Timestamp) -> MintWindow {
        let index = now.saturating_sub(genesis) / self.window_length;
        match self.window {
            Some(window) if window.window_index == index => window,
            _ => MintWindow {
                window_index: index,
                window_start: genesis + index * self.window_length,
                minted_in_window: 0,
            },
        }
    }

    /// Cap applying to the window with the given index.
    pub fn cap_for_window(&self, index: u64) -> Amount {
        match &self.tail {
            Some(tail) if index >= tail.full_rate_windows => {
                let burned_before = index
                    .checked_sub(1)
                    .and_then(|prev| self.burned_by_window.get(&prev).copied())
                    .unwrap_or(0);
                burned_before.min(tail.tail_cap)
            }
            _ => self.yearly_cap,
        }
    }

    /// Amount that can still be minted at `now`.
    pub fn remaining(&self, now: Timestamp, genesis: Option<Timestamp>) -> Amount {
        match genesis {
            None => self
                .initial_supply_ceiling
                .saturating_sub(self.pre_genesis_minted),
            Some(genesis) => {
                let window = self.window_at(now, genesis);
                self.cap_for_window(window.window_index)
                    .saturating_sub(window.minted_in_window)
            }
        }
    }

    /// Reserve `amount` of mint allowance. Nothing changes on failure.
    pub fn try_mint(
        &mut self,
        amount: Amount,
        now: Timestamp,
        genesis: Option<Timestamp>,
    ) -> Result<()> {
        if amount == 0 {
            return Err(LedgerError::InvalidAmount("mint amount must be positive"));
        }

        let remaining = self.remaining(now, genesis);
        if amount > remaining {
            warn!(
                target: "ledger",
                "Mint of {} rejected: only {} remaining (genesis set: {})",
                amount,
                remaining,
                genesis.is_some()
            );
            return Err(LedgerError::AllowanceExceeded {
                requested: amount,
                remaining,
            });
        }

        match genesis {
            None => self.pre_genesis_minted += amount,
            Some(genesis) => {
                let mut window = self.window_at(now, genesis);
                if self.window.map(|w| w.window_index) != Some(window.window_index) {
                    debug!(
                        target: "ledger",
                        "Mint window {} opened at {}",
                        window.window_index,
                        window.window_start
                    );
                }
                window.minted_in_window += amount;
                self.window = Some(window);
            }
        }
        self.total_minted = self.total_minted.saturating_add(amount);
        Ok(())
    }

    /// Record a burn of the native token; feeds the tail cap of the next window.
    pub fn record_burn(&mut self, amount: Amount, now: Timestamp, genesis: Option<Timestamp>) {
        self.total_burned = self.total_burned.saturating_add(amount);
        if let Some(genesis) = genesis {
            let index = now.saturating_sub(genesis) / self.window_length;
            let burned = self.burned_by_window.entry(index).or_insert(0);
            *burned = burned.saturating_add(amount);
        }
    }

    pub fn current_window(&self) -> Option<MintWindow> {
        self.window
    }

    pub fn pre_genesis_minted(&self) -> Amount {
        self.pre_genesis_minted
    }

    pub fn total_minted(&self) -> Amount {
        self.total_minted
    }

    pub fn total_burned(&self) -> Amount {
        self.total_burned
    }

    /// True once anything has been minted against a post-genesis window.
    pub fn has_post_genesis_mints(&self) -> bool {
        self.window.is_some()
    }
}
