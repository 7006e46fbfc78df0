/*
[INPUT]:  Stream configuration, subscriptions and operation requests
[OUTPUT]: Real-time pushes, book snapshots and correlated replies
[POS]:    WebSocket layer - real-time data streams
[UPDATE]: When adding new channels or changing connection logic
*/

pub mod backoff;
pub mod client;
pub mod correlator;
pub mod dispatch;
pub mod handler;
pub mod message;
pub mod subscription;

pub use backoff::Backoff;
pub use client::{ConnectionState, ReadOutcome, WsClient};
pub use correlator::{PendingOperations, PendingSlot, Reply, evaluate_reply, new_request_id};
pub use dispatch::{Delivery, DispatchMode, Dispatcher, OverflowPolicy};
pub use handler::{BookEvent, ChannelEvent, ChannelHandler, HandlerRegistry};
pub use message::{ControlEvent, DataPush, EventKind, Frame, OperationReply, Request};
pub use subscription::SubscriptionSet;
