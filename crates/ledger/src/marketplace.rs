//! Escrow-based secondary market for units
//!
//! Listing a unit moves it into escrow (the engine custody becomes the holder
//! of record) until the order is filled or cancelled. Orders are immutable
//! once they leave `Active`.

use crate::errors::{LedgerError, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use unitvault_types::{bps_of, Address, Amount, OrderId, Timestamp, UnitId, BPS_DENOMINATOR};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    Active,
    Cancelled,
    Filled,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SellOrder {
    pub order_id: OrderId,
    pub unit_id: UnitId,
    pub seller: Address,
    pub price: Amount,
    pub status: OrderStatus,
    pub created_at: Timestamp,
    pub closed_at: Option<Timestamp>,
    pub buyer: Option<Address>,
}

/// Payment split for a filled order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Settlement {
    pub order_id: OrderId,
    pub unit_id: UnitId,
    pub seller: Address,
    pub buyer: Address,
    pub price: Amount,
    pub fee: Amount,
    pub seller_proceeds: Amount,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Marketplace {
    orders: Vec<SellOrder>,
    /// unit → its active order
    escrowed: BTreeMap<UnitId, OrderId>,
    transfers_enabled: bool,
    fee_bps: u16,
    max_fee_bps: u16,
}

impl Marketplace {
    pub fn new(transfers_enabled: bool, fee_bps: u16, max_fee_bps: u16) -> Self {
        Self {
            orders: Vec::new(),
            escrowed: BTreeMap::new(),
            transfers_enabled,
            fee_bps: fee_bps.min(max_fee_bps),
            max_fee_bps,
        }
    }

    pub fn transfers_enabled(&self) -> bool {
        self.transfers_enabled
    }

    pub fn set_transfers_enabled(&mut self, enabled: bool) {
        self.transfers_enabled = enabled;
    }

    pub fn fee_bps(&self) -> u16 {
        self.fee_bps
    }

    pub fn set_fee_bps(&mut self, fee_bps: u16) -> Result<()> {
        if fee_bps > self.max_fee_bps || fee_bps as u128 > BPS_DENOMINATOR {
            return Err(LedgerError::InvalidParameter(format!(
                "market fee {} bps exceeds maximum {}",
                fee_bps, self.max_fee_bps
            )));
        }
        self.fee_bps = fee_bps;
        Ok(())
    }

    pub fn is_escrowed(&self, unit_id: UnitId) -> bool {
        self.escrowed.contains_key(&unit_id)
    }

    pub fn order(&self, order_id: OrderId) -> Result<&SellOrder> {
        (order_id as usize)
            .checked_sub(1)
            .and_then(|i| self.orders.get(i))
            .ok_or_else(|| LedgerError::not_found("order", order_id))
    }

    fn active_order_mut(&mut self, order_id: OrderId) -> Result<&mut SellOrder> {
        let order = (order_id as usize)
            .checked_sub(1)
            .and_then(|i| self.orders.get_mut(i))
            .ok_or_else(|| LedgerError::not_found("order", order_id))?;
        if order.status != OrderStatus::Active {
            return Err(LedgerError::wrong_state("order", order_id, order.status));
        }
        Ok(order)
    }

    pub fn active_orders(&self) -> Vec<SellOrder> {
        self.orders
            .iter()
            .filter(|o| o.status == OrderStatus::Active)
            .cloned()
            .collect()
    }

    /// Open an order and put the unit in escrow. Ownership and unit state are checked by the caller.
    pub fn create_order(
        &mut self,
        unit_id: UnitId,
        seller: Address,
        price: Amount,
        now: Timestamp,
    ) -> Result<OrderId> {
        if !self.transfers_enabled {
            return Err(LedgerError::TransfersDisabled);
        }
        if price == 0 {
            return Err(LedgerError::InvalidAmount("order price must be positive"));
        }
        if let Some(existing) = self.escrowed.get(&unit_id) {
            return Err(LedgerError::WrongState {
                entity: "unit",
                id: unit_id as u64,
                state: format!("listed in order {existing}"),
            });
        }

        let order_id = self.orders.len() as OrderId + 1;
        self.orders.push(SellOrder {
            order_id,
            unit_id,
            seller,
            price,
            status: OrderStatus::Active,
            created_at: now,
            closed_at: None,
            buyer: None,
        });
        self.escrowed.insert(unit_id, order_id);
        Ok(order_id)
    }

    pub fn fill(&mut self, order_id: OrderId, buyer: Address, now: Timestamp) -> Result<Settlement> {
        if !self.transfers_enabled {
            return Err(LedgerError::TransfersDisabled);
        }
        let fee_bps = self.fee_bps;
        let order = self.active_order_mut(order_id)?;
        if order.seller == buyer {
            return Err(LedgerError::InvalidParameter(
                "seller cannot buy their own order".into(),
            ));
        }

        let fee = bps_of(order.price, fee_bps).ok_or(LedgerError::ArithmeticOverflow("market fee"))?;
        order.status = OrderStatus::Filled;
        order.closed_at = Some(now);
        order.buyer = Some(buyer);

        let settlement = Settlement {
            order_id,
            unit_id: order.unit_id,
            seller: order.seller,
            buyer,
            price: order.price,
            fee,
            seller_proceeds: order.price - fee,
        };
        self.escrowed.remove(&settlement.unit_id);
        Ok(settlement)
    }

    /// Cancel an active order; returns the unit to hand back to the seller.
    pub fn cancel(&mut self, order_id: OrderId, caller: &Address, now: Timestamp) -> Result<UnitId> {
        let order = self.active_order_mut(order_id)?;
        if order.seller != *caller {
            return Err(LedgerError::NotOwner {
                caller: *caller,
                entity: "order",
                id: order_id as u64,
            });
        }
        order.status = OrderStatus::Cancelled;
        order.closed_at = Some(now);
        let unit_id = order.unit_id;
        self.escrowed.remove(&unit_id);
        Ok(unit_id)
    }
}
