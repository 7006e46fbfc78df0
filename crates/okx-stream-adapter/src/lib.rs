/*
[INPUT]:  Crate modules and public type definitions
[OUTPUT]: Public OKX stream adapter crate surface
[POS]:    Crate root - module wiring
[UPDATE]: When public modules or exports change
*/

pub mod auth;
pub mod book;
pub mod config;
pub mod error;
pub mod types;
pub mod ws;

// Re-export commonly used types from auth
pub use auth::{Clock, Credentials, HmacSha256Signer, LoginArgs, RequestSigner, SystemClock};

// Re-export commonly used types from book
pub use book::{OrderBook, OrderBookSnapshot, OrderBookStore, PriceLevel};

pub use config::{ApiKeyConfig, StreamConfig};
pub use error::{IntegrityError, ItemFailure, OkxError, Result};

// Re-export all types
pub use types::*;

// Re-export commonly used types from ws
pub use ws::{
    BookEvent,
    ChannelEvent,
    ConnectionState,
    ControlEvent,
    DispatchMode,
    EventKind,
    OperationReply,
    OverflowPolicy,
    WsClient,
};
