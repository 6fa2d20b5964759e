//! Engine parameters and TOML configuration
//!
//! `LedgerParams` holds the protocol constants (supply, split, unlock and
//! mint schedule). `EngineConfig` adds the deployment-specific pieces: well
//! known accounts, token identifiers, initial switches and capability grants.

use crate::access::Capability;
use crate::errors::{LedgerError, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use unitvault_types::{
    amount_serde, days, tokens, Address, Amount, Timestamp, TokenId, BPS_DENOMINATOR,
    SECONDS_PER_YEAR,
};

/// Tail schedule for the native mint cap once the full-rate windows are over.
///
/// From window index `full_rate_windows` onward the window cap becomes
/// `min(burned_in_previous_window, tail_cap)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MintTailPolicy {
    pub full_rate_windows: u64,
    #[serde(with = "amount_serde")]
    pub tail_cap: Amount,
}

/// Protocol constants.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LedgerParams {
    /// Size of the slot universe; accumulator math always divides by this.
    pub max_supply: u32,
    /// Share of each distribution credited to units (rest goes to the external account).
    pub unit_share_bps: u16,
    /// Locked native grant attached to every unit at issuance.
    #[serde(with = "amount_serde")]
    pub unit_grant: Amount,
    pub lock_period: Timestamp,
    pub unlock_periods: u32,
    pub unlock_interval: Timestamp,
    pub termination_cooldown: Timestamp,
    #[serde(with = "amount_serde")]
    pub yearly_mint_cap: Amount,
    #[serde(with = "amount_serde")]
    pub initial_supply_ceiling: Amount,
    pub mint_window_length: Timestamp,
    pub max_market_fee_bps: u16,
    pub mint_tail: Option<MintTailPolicy>,
}

impl Default for LedgerParams {
    fn default() -> Self {
        Self {
            max_supply: 5_000,
            unit_share_bps: 8_000,
            unit_grant: tokens(2_000),
            lock_period: days(365),
            unlock_periods: 25,
            unlock_interval: days(30),
            termination_cooldown: days(2),
            yearly_mint_cap: tokens(5_000_000),
            initial_supply_ceiling: tokens(70_000_000),
            mint_window_length: SECONDS_PER_YEAR,
            max_market_fee_bps: 10_000,
            mint_tail: None,
        }
    }
}

impl LedgerParams {
    pub fn validate(&self) -> Result<()> {
        if self.max_supply == 0 {
            return Err(LedgerError::Config("max_supply must be positive".into()));
        }
        if self.unit_share_bps as u128 > BPS_DENOMINATOR {
            return Err(LedgerError::Config(format!(
                "unit_share_bps {} exceeds {}",
                self.unit_share_bps, BPS_DENOMINATOR
            )));
        }
        if self.max_market_fee_bps as u128 > BPS_DENOMINATOR {
            return Err(LedgerError::Config(format!(
                "max_market_fee_bps {} exceeds {}",
                self.max_market_fee_bps, BPS_DENOMINATOR
            )));
        }
        if self.unlock_periods == 0 || self.unlock_interval == 0 {
            return Err(LedgerError::Config(
                "unlock_periods and unlock_interval must be positive".into(),
            ));
        }
        if self.mint_window_length == 0 {
            return Err(LedgerError::Config(
                "mint_window_length must be positive".into(),
            ));
        }
        Ok(())
    }

    /// Total native grant locked across a fully issued supply.
    pub fn total_grant_liability(&self) -> Option<Amount> {
        self.unit_grant.checked_mul(self.max_supply as Amount)
    }
}

/// Well-known accounts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountsConfig {
    /// Receives the initial `Admin` capability.
    pub admin: Address,
    /// Receives issuance payments, extracted vault balances and market fees.
    pub treasury: Address,
    /// Receives the non-unit share of every distribution.
    pub external_share_recipient: Address,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokensConfig {
    /// The produced (native) reward token; unit grants are denominated in it.
    pub native: TokenId,
    /// Token used for batch prices and marketplace payments.
    pub payment: TokenId,
}

impl Default for TokensConfig {
    fn default() -> Self {
        Self {
            native: TokenId::new("UVT"),
            payment: TokenId::new("USDT"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CapabilityGrant {
    pub address: Address,
    pub capabilities: Vec<Capability>,
}

/// Full engine configuration, usually loaded from TOML.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineConfig {
    #[serde(default)]
    pub params: LedgerParams,
    pub accounts: AccountsConfig,
    #[serde(default)]
    pub tokens: TokensConfig,
    #[serde(default)]
    pub genesis_time: Option<Timestamp>,
    #[serde(default)]
    pub transfers_enabled: bool,
    #[serde(default)]
    pub market_fee_bps: u16,
    #[serde(default)]
    pub grants: Vec<CapabilityGrant>,
}

impl EngineConfig {
    /// Minimal configuration with default parameters.
    pub fn new(admin: Address, treasury: Address, external_share_recipient: Address) -> Self {
        Self {
            params: LedgerParams::default(),
            accounts: AccountsConfig {
                admin,
                treasury,
                external_share_recipient,
            },
            tokens: TokensConfig::default(),
            genesis_time: None,
            transfers_enabled: false,
            market_fee_bps: 0,
            grants: Vec::new(),
        }
    }

    pub fn from_toml_str(raw: &str) -> Result<Self> {
        let config: EngineConfig =
            toml::from_str(raw).map_err(|e| LedgerError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .map_err(|e| LedgerError::Config(format!("{}: {e}", path.display())))?;
        Self::from_toml_str(&raw)
    }

    pub fn validate(&self) -> Result<()> {
        self.params.validate()?;
        if self.market_fee_bps > self.params.max_market_fee_bps {
            return Err(LedgerError::Config(format!(
                "market_fee_bps {} exceeds max_market_fee_bps {}",
                self.market_fee_bps, self.params.max_market_fee_bps
            )));
        }
        if self.tokens.native == self.tokens.payment {
            return Err(LedgerError::Config(
                "native and payment tokens must differ".into(),
            ));
        }
        Ok(())
    }
}
