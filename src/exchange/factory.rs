use std::sync::Arc;
use std::time::Duration;

use crate::adapters::{InMemoryOrderBook, OrderBookClient};
use crate::config::AppConfig;
use crate::error::Result;

use super::{parse_order_book_kind, OrderBook, OrderBookKind};

/// Create the runtime order book from `AppConfig`.
///
/// `dry_run` forces the in-memory book regardless of the configured kind.
pub fn build_order_book(app_config: &AppConfig, dry_run: bool) -> Result<Arc<dyn OrderBook>> {
    let kind = if dry_run || app_config.order_book.dry_run {
        OrderBookKind::InMemory
    } else {
        parse_order_book_kind(&app_config.order_book.kind)?
    };

    build_order_book_for(kind, app_config)
}

/// Create an order book for an explicit kind.
pub fn build_order_book_for(
    kind: OrderBookKind,
    app_config: &AppConfig,
) -> Result<Arc<dyn OrderBook>> {
    match kind {
        OrderBookKind::Http => {
            let client = OrderBookClient::new(
                Some(&app_config.order_book.base_url),
                Duration::from_millis(app_config.order_book.request_timeout_ms),
            )?;
            Ok(Arc::new(client))
        }
        OrderBookKind::InMemory => Ok(Arc::new(InMemoryOrderBook::new(app_config.domain()?))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dry_run_forces_in_memory_book() {
        let config = AppConfig::default_config();
        assert_eq!(build_order_book(&config, true).unwrap().kind(), OrderBookKind::InMemory);
        assert_eq!(build_order_book(&config, false).unwrap().kind(), OrderBookKind::Http);
    }
}
