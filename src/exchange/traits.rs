use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::str::FromStr;

use crate::eip712::ReadyOrder;
use crate::error::{Result, WatchtowerError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderBookKind {
    Http,
    InMemory,
}

impl Default for OrderBookKind {
    fn default() -> Self {
        Self::Http
    }
}

impl OrderBookKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Http => "http",
            Self::InMemory => "in_memory",
        }
    }
}

impl std::fmt::Display for OrderBookKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for OrderBookKind {
    type Err = &'static str;

    fn from_str(raw: &str) -> std::result::Result<Self, Self::Err> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "http" | "api" => Ok(Self::Http),
            "in_memory" | "memory" | "dry_run" => Ok(Self::InMemory),
            _ => Err("invalid order book; expected http|in_memory"),
        }
    }
}

pub fn parse_order_book_kind(raw: &str) -> Result<OrderBookKind> {
    OrderBookKind::from_str(raw).map_err(|e| WatchtowerError::Validation(e.to_string()))
}

/// Order-book API as seen by the rounds.
///
/// Failures are returned as errors; the behaviours turn them into sentinel
/// payloads so that a flaky API never stalls consensus.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait OrderBook: Send + Sync {
    fn kind(&self) -> OrderBookKind;

    /// Submit a ready order, returning the UID assigned by the order book.
    async fn submit_order(&self, order: &ReadyOrder) -> Result<String>;

    /// Whether an order with this UID is known to the order book.
    async fn order_exists(&self, uid: &str) -> Result<bool>;
}
