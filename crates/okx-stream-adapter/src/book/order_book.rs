/*
[INPUT]:  Book snapshot/delta payloads for one (channel, instrument)
[OUTPUT]: Reconstructed, integrity-checked price levels and read-only snapshots
[POS]:    Book layer - single order book state machine (Empty <-> Ready)
[UPDATE]: When merge rules, sequence semantics or snapshot shape change
*/

use std::collections::BTreeMap;
use std::str::FromStr;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::book::checksum::{checksum, validate_sequence, verify_checksum};
use crate::error::IntegrityError;
use crate::types::{BookAction, BookData, Channel, MergeStrategy, WireLevel};

// Sequence id held before the first snapshot and after invalidation.
const NO_SEQUENCE: i64 = -1;

/// A price level as received from the server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PriceLevel {
    pub price: String,
    pub size: String,
    pub order_count: Option<u32>,
}

impl PriceLevel {
    pub fn new(price: impl Into<String>, size: impl Into<String>) -> Self {
        Self {
            price: price.into(),
            size: size.into(),
            order_count: None,
        }
    }

    pub fn with_order_count(mut self, order_count: u32) -> Self {
        self.order_count = Some(order_count);
        self
    }

    pub fn price_decimal(&self) -> Option<Decimal> {
        Decimal::from_str(&self.price).ok()
    }

    pub fn size_decimal(&self) -> Option<Decimal> {
        Decimal::from_str(&self.size).ok()
    }
}

/// Immutable point-in-time copy of an order book.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderBookSnapshot {
    pub channel: Channel,
    pub inst_id: String,
    /// Best (highest) bid first
    pub bids: Vec<PriceLevel>,
    /// Best (lowest) ask first
    pub asks: Vec<PriceLevel>,
    pub sequence_id: i64,
    pub previous_sequence_id: i64,
    pub timestamp: u64,
    pub checksum: i32,
    pub ready: bool,
}

impl OrderBookSnapshot {
    pub fn best_bid(&self) -> Option<&PriceLevel> {
        self.bids.first()
    }

    pub fn best_ask(&self) -> Option<&PriceLevel> {
        self.asks.first()
    }

    pub fn spread(&self) -> Option<Decimal> {
        let bid = self.best_bid()?.price_decimal()?;
        let ask = self.best_ask()?.price_decimal()?;
        Some(ask - bid)
    }
}

/// Reconstructed order book for one (channel, instrument) pair.
#[derive(Debug, Clone)]
pub struct OrderBook {
    channel: Channel,
    inst_id: String,
    strategy: MergeStrategy,
    checksum_depth: usize,
    /// Keyed by parsed price; iterate in reverse for best bid first.
    bids: BTreeMap<Decimal, PriceLevel>,
    asks: BTreeMap<Decimal, PriceLevel>,
    sequence_id: i64,
    previous_sequence_id: i64,
    timestamp: u64,
    checksum: i32,
    ready: bool,
    /// A fresh snapshot was requested and has not arrived yet
    recovering: bool,
}

impl OrderBook {
    /// Create an empty book.
    ///
    /// `checksum_depth` applies to diff books; replace books checksum every level they hold.
    pub fn new(
        channel: Channel,
        inst_id: impl Into<String>,
        strategy: MergeStrategy,
        checksum_depth: usize,
    ) -> Self {
        Self {
            channel,
            inst_id: inst_id.into(),
            strategy,
            checksum_depth,
            bids: BTreeMap::new(),
            asks: BTreeMap::new(),
            sequence_id: NO_SEQUENCE,
            previous_sequence_id: NO_SEQUENCE,
            timestamp: 0,
            checksum: 0,
            ready: false,
            recovering: false,
        }
    }

    pub fn is_ready(&self) -> bool {
        self.ready
    }

    pub fn sequence_id(&self) -> i64 {
        self.sequence_id
    }

    pub fn strategy(&self) -> MergeStrategy {
        self.strategy
    }

    /// Apply one push element. Any integrity failure leaves the book empty.
    pub fn apply(&mut self, action: Option<BookAction>, data: &BookData) -> Result<(), IntegrityError> {
        let result = match (self.strategy, action) {
            (MergeStrategy::Diff, Some(BookAction::Update)) => self.apply_update(data),
            _ => self.apply_snapshot(data),
        };
        if result.is_err() {
            self.invalidate();
        }
        result
    }

    /// Replace both sides wholesale and re-verify the server checksum.
    pub fn apply_snapshot(&mut self, data: &BookData) -> Result<(), IntegrityError> {
        let bids = build_side(&data.bids)?;
        let asks = build_side(&data.asks)?;

        let computed = checksum(bids.values().rev(), asks.values(), self.depth());
        if let Some(expected) = data.checksum {
            verify_checksum(expected, computed)?;
        }

        self.bids = bids;
        self.asks = asks;
        self.sequence_id = data.seq_id.unwrap_or(NO_SEQUENCE);
        self.previous_sequence_id = data.prev_seq_id.unwrap_or(NO_SEQUENCE);
        self.timestamp = data.ts;
        self.checksum = data.checksum.unwrap_or(computed);
        self.ready = true;
        self.recovering = false;
        Ok(())
    }

    /// Merge a delta: size 0 deletes the level, anything else upserts it.
    pub fn apply_update(&mut self, data: &BookData) -> Result<(), IntegrityError> {
        if !self.ready {
            return Err(IntegrityError::MissingSnapshot);
        }
        validate_sequence(self.sequence_id, data.prev_seq_id.unwrap_or(NO_SEQUENCE))?;

        merge_side(&mut self.bids, &data.bids)?;
        merge_side(&mut self.asks, &data.asks)?;

        let computed = checksum(self.bids.values().rev(), self.asks.values(), self.depth());
        if let Some(expected) = data.checksum {
            verify_checksum(expected, computed)?;
        }

        self.previous_sequence_id = self.sequence_id;
        if let Some(seq_id) = data.seq_id {
            self.sequence_id = seq_id;
        }
        self.timestamp = data.ts;
        self.checksum = data.checksum.unwrap_or(computed);
        Ok(())
    }

    /// Drop all levels; a fresh snapshot is needed before deltas apply again.
    pub fn invalidate(&mut self) {
        self.bids.clear();
        self.asks.clear();
        self.sequence_id = NO_SEQUENCE;
        self.previous_sequence_id = NO_SEQUENCE;
        self.checksum = 0;
        self.ready = false;
    }

    /// Mark the book as awaiting a fresh snapshot.
    ///
    /// Returns true only for the first call since the last applied snapshot,
    /// so deltas failing behind the original break do not request again.
    pub fn begin_recovery(&mut self) -> bool {
        !std::mem::replace(&mut self.recovering, true)
    }

    pub fn is_recovering(&self) -> bool {
        self.recovering
    }

    pub fn end_recovery(&mut self) {
        self.recovering = false;
    }

    pub fn snapshot(&self) -> OrderBookSnapshot {
        OrderBookSnapshot {
            channel: self.channel,
            inst_id: self.inst_id.clone(),
            bids: self.bids.values().rev().cloned().collect(),
            asks: self.asks.values().cloned().collect(),
            sequence_id: self.sequence_id,
            previous_sequence_id: self.previous_sequence_id,
            timestamp: self.timestamp,
            checksum: self.checksum,
            ready: self.ready,
        }
    }

    fn depth(&self) -> usize {
        match self.strategy {
            MergeStrategy::Diff => self.checksum_depth,
            MergeStrategy::Replace => usize::MAX,
        }
    }
}

fn parse_level(wire: &WireLevel) -> Result<(Decimal, Decimal, PriceLevel), IntegrityError> {
    let invalid = || IntegrityError::InvalidLevel {
        value: wire.0.join(","),
    };
    let price = wire.price().ok_or_else(invalid)?;
    let size = wire.size().ok_or_else(invalid)?;
    let price_key = Decimal::from_str(price).map_err(|_| invalid())?;
    let size_value = Decimal::from_str(size).map_err(|_| invalid())?;
    if size_value < Decimal::ZERO {
        return Err(invalid());
    }

    let level = PriceLevel {
        price: price.to_string(),
        size: size.to_string(),
        order_count: wire.order_count(),
    };
    Ok((price_key, size_value, level))
}

fn build_side(levels: &[WireLevel]) -> Result<BTreeMap<Decimal, PriceLevel>, IntegrityError> {
    let mut side = BTreeMap::new();
    merge_side(&mut side, levels)?;
    Ok(side)
}

fn merge_side(
    side: &mut BTreeMap<Decimal, PriceLevel>,
    levels: &[WireLevel],
) -> Result<(), IntegrityError> {
    for wire in levels {
        let (price, size, level) = parse_level(wire)?;
        if size.is_zero() {
            side.remove(&price);
        } else {
            side.insert(price, level);
        }
    }
    Ok(())
}
