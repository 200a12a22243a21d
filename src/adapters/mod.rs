pub mod memory_order_book;
pub mod order_book;

pub use memory_order_book::{InMemoryOrderBook, SubmissionMode};
pub use order_book::{OrderBookClient, DEFAULT_ORDER_BOOK_API};
