pub mod factory;
mod traits;

pub use factory::{build_order_book, build_order_book_for};
#[cfg(test)]
pub use traits::MockOrderBook;
pub use traits::{parse_order_book_kind, OrderBook, OrderBookKind};
