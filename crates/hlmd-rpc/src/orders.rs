//! In-memory order book backing `placeOrder` / `cancelOrder`.

use dashmap::DashMap;
use hlmd_core::{CoreError, OrderRecord, OrderSide};
use rust_decimal::Decimal;
use tracing::info;

/// Local orders keyed by order id.
#[derive(Debug, Default)]
pub struct OrderBook {
    orders: DashMap<String, OrderRecord>,
}

impl OrderBook {
    pub fn new() -> Self {
        Self::default()
    }

    /// Book an open order. `coin` is stored as given.
    pub fn place(
        &self,
        coin: String,
        side: OrderSide,
        size: Decimal,
        now_ms: u64,
    ) -> Result<OrderRecord, CoreError> {
        let order = OrderRecord::open(coin, side, size, now_ms)?;
        info!(
            order_id = %order.id,
            coin = %order.coin,
            side = %order.side,
            size = %order.size,
            "Order booked"
        );
        self.orders
            .insert(order.id.as_str().to_string(), order.clone());
        Ok(order)
    }

    /// Cancel by id. Cancelling a cancelled order succeeds again.
    pub fn cancel(&self, order_id: &str) -> Option<OrderRecord> {
        let mut entry = self.orders.get_mut(order_id)?;
        entry.cancel();
        info!(order_id, "Order cancelled");
        Some(entry.value().clone())
    }

    pub fn get(&self, order_id: &str) -> Option<OrderRecord> {
        self.orders.get(order_id).map(|entry| entry.value().clone())
    }

    pub fn len(&self) -> usize {
        self.orders.len()
    }

    pub fn is_empty(&self) -> bool {
        self.orders.is_empty()
    }
}
