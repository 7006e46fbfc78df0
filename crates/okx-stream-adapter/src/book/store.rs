/*
[INPUT]:  Book pushes routed by channel and instrument
[OUTPUT]: Per-(channel, instrument) books and their read-only snapshots
[POS]:    Book layer - owning store shared by the read loop and callers
[UPDATE]: When book keying or invalidation policy changes
*/

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use crate::book::order_book::{OrderBook, OrderBookSnapshot};
use crate::error::{OkxError, Result};
use crate::types::{BookAction, BookData, Channel};

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct BookKey {
    channel: Channel,
    inst_id: String,
}

/// Owns every reconstructed book; callers only ever see snapshot copies.
#[derive(Debug)]
pub struct OrderBookStore {
    books: Mutex<HashMap<BookKey, OrderBook>>,
    checksum_depth: usize,
}

impl OrderBookStore {
    pub fn new(checksum_depth: usize) -> Self {
        Self {
            books: Mutex::new(HashMap::new()),
            checksum_depth,
        }
    }

    /// Apply one push element and return the resulting snapshot.
    ///
    /// The book is created on first use. On integrity failure the book is
    /// left empty and the typed error is returned.
    pub fn apply(
        &self,
        channel: Channel,
        inst_id: &str,
        action: Option<BookAction>,
        data: &BookData,
    ) -> Result<OrderBookSnapshot> {
        let strategy = channel.merge_strategy().ok_or_else(|| {
            OkxError::InvalidArgument(format!("{channel} is not an order book channel"))
        })?;

        let mut books = self.lock();
        let book = books
            .entry(BookKey {
                channel,
                inst_id: inst_id.to_string(),
            })
            .or_insert_with(|| OrderBook::new(channel, inst_id, strategy, self.checksum_depth));

        book.apply(action, data)?;
        Ok(book.snapshot())
    }

    pub fn snapshot(&self, channel: Channel, inst_id: &str) -> Option<OrderBookSnapshot> {
        self.lock()
            .get(&BookKey {
                channel,
                inst_id: inst_id.to_string(),
            })
            .map(OrderBook::snapshot)
    }

    pub fn remove(&self, channel: Channel, inst_id: &str) -> bool {
        self.lock()
            .remove(&BookKey {
                channel,
                inst_id: inst_id.to_string(),
            })
            .is_some()
    }

    /// Claim the snapshot request for a failed book.
    ///
    /// True for the first failure since the book's last snapshot; false for
    /// every later one and for unknown books.
    pub fn begin_recovery(&self, channel: Channel, inst_id: &str) -> bool {
        self.lock()
            .get_mut(&BookKey {
                channel,
                inst_id: inst_id.to_string(),
            })
            .is_some_and(OrderBook::begin_recovery)
    }

    /// Mark every book stale, e.g. after the connection carrying them dropped.
    ///
    /// Pending recoveries are dropped too; the next connection replays every
    /// subscription and so receives fresh snapshots anyway.
    pub fn invalidate_all(&self) {
        for book in self.lock().values_mut() {
            book.invalidate();
            book.end_recovery();
        }
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<BookKey, OrderBook>> {
        self.books.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
