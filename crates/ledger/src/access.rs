//! Capability-based authorization
//!
//! Roles are plain data: each address maps to a set of capabilities, checked
//! once at the boundary of every mutating operation. Unit ownership is not a
//! capability; it is checked against the holder registry in `units`.

use crate::errors::{LedgerError, Result};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use unitvault_types::Address;

/// Operator roles recognised by the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Capability {
    /// Genesis, capability grants and account settings. Implies every other capability.
    Admin,
    /// Whitelist, batches, vault extraction, market settings.
    Operator,
    /// Reward distribution and native minting.
    Distributor,
    /// Vesting schedule creation and releases on behalf of beneficiaries.
    VestingAdmin,
}

/// Address → capability set.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AccessTable {
    grants: BTreeMap<Address, BTreeSet<Capability>>,
}

impl AccessTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Grant a capability; returns false if it was already held.
    pub fn grant(&mut self, who: Address, capability: Capability) -> bool {
        self.grants.entry(who).or_default().insert(capability)
    }

    /// Revoke a capability; returns false if it was not held.
    ///
    /// The last `Admin` cannot be revoked.
    pub fn revoke(&mut self, who: &Address, capability: Capability) -> Result<bool> {
        if capability == Capability::Admin && self.holders(Capability::Admin) == vec![*who] {
            return Err(LedgerError::InvalidParameter(
                "cannot revoke the last admin".into(),
            ));
        }

        let removed = match self.grants.get_mut(who) {
            Some(set) => set.remove(&capability),
            None => false,
        };
        if self.grants.get(who).is_some_and(|set| set.is_empty()) {
            self.grants.remove(who);
        }
        Ok(removed)
    }

    pub fn has(&self, who: &Address, capability: Capability) -> bool {
        self.grants
            .get(who)
            .is_some_and(|set| set.contains(&capability) || set.contains(&Capability::Admin))
    }

    /// Addresses holding `capability` directly (not through `Admin`).
    pub fn holders(&self, capability: Capability) -> Vec<Address> {
        self.grants
            .iter()
            .filter(|(_, set)| set.contains(&capability))
            .map(|(addr, _)| *addr)
            .collect()
    }

    pub fn require(&self, who: &Address, capability: Capability) -> Result<()> {
        if self.has(who, capability) {
            Ok(())
        } else {
            Err(LedgerError::Unauthorized {
                caller: *who,
                required: capability,
            })
        }
    }

}
