/*
[INPUT]:  User callbacks registered per channel, raw and error hooks
[OUTPUT]: Deliveries built from data pushes and book snapshots
[POS]:    WebSocket layer - handler registry consulted by the read loop
[UPDATE]: When adding handler kinds or changing delivery payloads
*/

use std::collections::HashMap;
use std::fmt;
use std::marker::PhantomData;
use std::sync::{Arc, PoisonError, RwLock};

use serde::de::DeserializeOwned;

use crate::book::OrderBookSnapshot;
use crate::error::OkxError;
use crate::types::{Channel, SubscriptionArg};
use crate::ws::dispatch::Delivery;
use crate::ws::message::DataPush;

/// Decoded data push handed to a channel handler.
#[derive(Debug, Clone, PartialEq)]
pub struct ChannelEvent<T> {
    pub arg: SubscriptionArg,
    pub action: Option<String>,
    pub data: Vec<T>,
}

/// Book view after a push was applied and validated.
#[derive(Debug, Clone, PartialEq)]
pub struct BookEvent {
    pub arg: SubscriptionArg,
    pub book: OrderBookSnapshot,
}

pub type RawCallback = Arc<dyn Fn(&str) + Send + Sync>;
pub type ErrorCallback = Arc<dyn Fn(&OkxError) + Send + Sync>;
pub type BookCallback = Arc<dyn Fn(BookEvent) + Send + Sync>;

/// Turns a data push into a ready-to-run delivery.
pub trait ChannelHandler: Send + Sync {
    fn prepare(&self, push: &DataPush) -> Result<Delivery, serde_json::Error>;
}

struct TypedHandler<T, F> {
    callback: Arc<F>,
    _payload: PhantomData<fn() -> T>,
}

impl<T, F> ChannelHandler for TypedHandler<T, F>
where
    T: DeserializeOwned + Send + 'static,
    F: Fn(ChannelEvent<T>) + Send + Sync + 'static,
{
    fn prepare(&self, push: &DataPush) -> Result<Delivery, serde_json::Error> {
        let event = ChannelEvent {
            arg: push.arg.clone(),
            action: push.action.clone(),
            data: push.decode::<T>()?,
        };
        let callback = self.callback.clone();
        Ok(Box::new(move || callback(event)))
    }
}

#[derive(Clone)]
pub enum Handler {
    Data(Arc<dyn ChannelHandler>),
    Book(BookCallback),
}

impl Handler {
    pub fn book_delivery(callback: &BookCallback, event: BookEvent) -> Delivery {
        let callback = callback.clone();
        Box::new(move || callback(event))
    }
}

/// One handler per channel; registering again replaces it.
#[derive(Default)]
pub struct HandlerRegistry {
    channels: RwLock<HashMap<Channel, Handler>>,
    raw: RwLock<Option<RawCallback>>,
    error: RwLock<Option<ErrorCallback>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_data<T, F>(&self, channel: Channel, callback: F)
    where
        T: DeserializeOwned + Send + 'static,
        F: Fn(ChannelEvent<T>) + Send + Sync + 'static,
    {
        let handler = TypedHandler {
            callback: Arc::new(callback),
            _payload: PhantomData,
        };
        self.channels
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(channel, Handler::Data(Arc::new(handler)));
    }

    pub fn register_book<F>(&self, channel: Channel, callback: F)
    where
        F: Fn(BookEvent) + Send + Sync + 'static,
    {
        self.channels
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(channel, Handler::Book(Arc::new(callback)));
    }

    pub fn get(&self, channel: Channel) -> Option<Handler> {
        self.channels
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&channel)
            .cloned()
    }

    pub fn set_raw<F>(&self, callback: F)
    where
        F: Fn(&str) + Send + Sync + 'static,
    {
        *self.raw.write().unwrap_or_else(PoisonError::into_inner) = Some(Arc::new(callback));
    }

    pub fn raw(&self) -> Option<RawCallback> {
        self.raw.read().unwrap_or_else(PoisonError::into_inner).clone()
    }

    pub fn set_error<F>(&self, callback: F)
    where
        F: Fn(&OkxError) + Send + Sync + 'static,
    {
        *self.error.write().unwrap_or_else(PoisonError::into_inner) = Some(Arc::new(callback));
    }

    /// Hand an asynchronous error to the error callback, if any.
    pub fn report_error(&self, err: &OkxError) -> bool {
        let callback = self.error.read().unwrap_or_else(PoisonError::into_inner).clone();
        match callback {
            Some(callback) => {
                callback(err);
                true
            }
            None => false,
        }
    }
}

impl fmt::Debug for HandlerRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let channels: Vec<Channel> = self
            .channels
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .copied()
            .collect();
        f.debug_struct("HandlerRegistry")
            .field("channels", &channels)
            .finish_non_exhaustive()
    }
}
