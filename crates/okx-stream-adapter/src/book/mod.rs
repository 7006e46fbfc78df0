/*
[INPUT]:  Book snapshot/delta pushes with sequence ids and checksums
[OUTPUT]: Validated order books and immutable snapshots
[POS]:    Book layer - order book reconstruction
[UPDATE]: When adding merge strategies or integrity checks
*/

pub mod checksum;
pub mod order_book;
pub mod store;

pub use checksum::{DEFAULT_CHECKSUM_DEPTH, checksum, validate_sequence, verify_checksum};
pub use order_book::{OrderBook, OrderBookSnapshot, PriceLevel};
pub use store::OrderBookStore;
