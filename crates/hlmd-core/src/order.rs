//! Local order records.
//!
//! Orders here never leave the daemon: they back the trade-category RPC
//! surface with an in-memory book so clients can exercise the protocol.

use crate::error::{CoreError, Result};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Order side: buy or sell.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderSide {
    Buy,
    Sell,
}

impl fmt::Display for OrderSide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Buy => write!(f, "buy"),
            Self::Sell => write!(f, "sell"),
        }
    }
}

impl FromStr for OrderSide {
    type Err = CoreError;

    /// Only the exact lowercase words are accepted.
    fn from_str(s: &str) -> Result<Self> {
        match s {
            "buy" => Ok(Self::Buy),
            "sell" => Ok(Self::Sell),
            other => Err(CoreError::InvalidSide(other.to_string())),
        }
    }
}

/// Lifecycle of a local order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderStatus {
    Open,
    Cancelled,
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Open => write!(f, "open"),
            Self::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// Local order identifier.
///
/// Format: `ord_{timestamp_ms}_{uuid_short}`
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OrderId(String);

impl OrderId {
    pub fn generate(now_ms: u64) -> Self {
        let uuid_short = &Uuid::new_v4().simple().to_string()[..8];
        Self(format!("ord_{now_ms}_{uuid_short}"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for OrderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A locally booked order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderRecord {
    pub id: OrderId,
    pub coin: String,
    pub side: OrderSide,
    pub size: Decimal,
    pub status: OrderStatus,
    /// Milliseconds since Unix epoch.
    pub created_at: u64,
}

impl OrderRecord {
    /// Book a new open order. `size` must be strictly positive.
    pub fn open(coin: String, side: OrderSide, size: Decimal, now_ms: u64) -> Result<Self> {
        if size <= Decimal::ZERO {
            return Err(CoreError::InvalidSize(size.to_string()));
        }
        Ok(Self {
            id: OrderId::generate(now_ms),
            coin,
            side,
            size,
            status: OrderStatus::Open,
            created_at: now_ms,
        })
    }

    /// Mark as cancelled. Repeating this is a no-op.
    pub fn cancel(&mut self) {
        self.status = OrderStatus::Cancelled;
    }
}
