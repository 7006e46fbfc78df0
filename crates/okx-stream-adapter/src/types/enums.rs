/*
[INPUT]:  Protocol channel names, operation names and order enums
[OUTPUT]: Typed Rust enums with serialization support
[POS]:    Data layer - closed sets of wire identifiers
[UPDATE]: When the server adds channels/operations or order parameters change
*/

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// How a book channel's messages merge into local state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeStrategy {
    /// Snapshot followed by price-keyed deltas with a sequence chain.
    Diff,
    /// Every message replaces the whole book.
    Replace,
}

/// Subscribable channels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Channel {
    #[serde(rename = "instruments")]
    Instruments,
    #[serde(rename = "tickers")]
    Tickers,
    #[serde(rename = "open-interest")]
    OpenInterest,
    #[serde(rename = "funding-rate")]
    FundingRate,
    #[serde(rename = "mark-price")]
    MarkPrice,
    #[serde(rename = "index-tickers")]
    IndexTickers,
    #[serde(rename = "price-limit")]
    PriceLimit,
    #[serde(rename = "trades")]
    Trades,
    #[serde(rename = "trades-all")]
    TradesAll,
    #[serde(rename = "books")]
    Books,
    #[serde(rename = "books5")]
    Books5,
    #[serde(rename = "bbo-tbt")]
    BboTbt,
    #[serde(rename = "books-l2-tbt")]
    BooksL2Tbt,
    #[serde(rename = "books50-l2-tbt")]
    Books50L2Tbt,
    #[serde(rename = "account")]
    Account,
    #[serde(rename = "positions")]
    Positions,
    #[serde(rename = "balance_and_position")]
    BalanceAndPosition,
    #[serde(rename = "orders")]
    Orders,
    #[serde(rename = "orders-algo")]
    OrdersAlgo,
    #[serde(rename = "liquidation-warning")]
    LiquidationWarning,
}

impl Channel {
    pub const ALL: [Channel; 20] = [
        Channel::Instruments,
        Channel::Tickers,
        Channel::OpenInterest,
        Channel::FundingRate,
        Channel::MarkPrice,
        Channel::IndexTickers,
        Channel::PriceLimit,
        Channel::Trades,
        Channel::TradesAll,
        Channel::Books,
        Channel::Books5,
        Channel::BboTbt,
        Channel::BooksL2Tbt,
        Channel::Books50L2Tbt,
        Channel::Account,
        Channel::Positions,
        Channel::BalanceAndPosition,
        Channel::Orders,
        Channel::OrdersAlgo,
        Channel::LiquidationWarning,
    ];

    /// Wire name of the channel
    pub fn as_str(&self) -> &'static str {
        match self {
            Channel::Instruments => "instruments",
            Channel::Tickers => "tickers",
            Channel::OpenInterest => "open-interest",
            Channel::FundingRate => "funding-rate",
            Channel::MarkPrice => "mark-price",
            Channel::IndexTickers => "index-tickers",
            Channel::PriceLimit => "price-limit",
            Channel::Trades => "trades",
            Channel::TradesAll => "trades-all",
            Channel::Books => "books",
            Channel::Books5 => "books5",
            Channel::BboTbt => "bbo-tbt",
            Channel::BooksL2Tbt => "books-l2-tbt",
            Channel::Books50L2Tbt => "books50-l2-tbt",
            Channel::Account => "account",
            Channel::Positions => "positions",
            Channel::BalanceAndPosition => "balance_and_position",
            Channel::Orders => "orders",
            Channel::OrdersAlgo => "orders-algo",
            Channel::LiquidationWarning => "liquidation-warning",
        }
    }

    /// Whether the server only serves this channel after login
    pub fn requires_login(&self) -> bool {
        matches!(
            self,
            Channel::BooksL2Tbt
                | Channel::Books50L2Tbt
                | Channel::Account
                | Channel::Positions
                | Channel::BalanceAndPosition
                | Channel::Orders
                | Channel::OrdersAlgo
                | Channel::LiquidationWarning
        )
    }

    /// Merge strategy for order book channels, `None` for everything else
    pub fn merge_strategy(&self) -> Option<MergeStrategy> {
        match self {
            Channel::Books | Channel::BooksL2Tbt | Channel::Books50L2Tbt => {
                Some(MergeStrategy::Diff)
            }
            Channel::Books5 | Channel::BboTbt => Some(MergeStrategy::Replace),
            _ => None,
        }
    }

    pub fn is_book(&self) -> bool {
        self.merge_strategy().is_some()
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Channel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Channel::ALL
            .iter()
            .copied()
            .find(|channel| channel.as_str() == s)
            .ok_or_else(|| format!("unknown channel: {s}"))
    }
}

/// Server endpoint a client connects to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Endpoint {
    Public,
    Private,
    Business,
}

impl Endpoint {
    pub fn path(&self) -> &'static str {
        match self {
            Endpoint::Public => "/ws/v5/public",
            Endpoint::Private => "/ws/v5/private",
            Endpoint::Business => "/ws/v5/business",
        }
    }
}

/// Correlated business operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Operation {
    #[serde(rename = "order")]
    PlaceOrder,
    #[serde(rename = "batch-orders")]
    BatchPlaceOrders,
    #[serde(rename = "cancel-order")]
    CancelOrder,
    #[serde(rename = "batch-cancel-orders")]
    BatchCancelOrders,
    #[serde(rename = "amend-order")]
    AmendOrder,
    #[serde(rename = "batch-amend-orders")]
    BatchAmendOrders,
    #[serde(rename = "mass-cancel")]
    MassCancel,
}

impl Operation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Operation::PlaceOrder => "order",
            Operation::BatchPlaceOrders => "batch-orders",
            Operation::CancelOrder => "cancel-order",
            Operation::BatchCancelOrders => "batch-cancel-orders",
            Operation::AmendOrder => "amend-order",
            Operation::BatchAmendOrders => "batch-amend-orders",
            Operation::MassCancel => "mass-cancel",
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum InstType {
    Spot,
    Margin,
    Swap,
    Futures,
    Option,
    Any,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    Buy,
    Sell,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PosSide {
    Long,
    Short,
    Net,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TradeMode {
    Cash,
    Cross,
    Isolated,
    SpotIsolated,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderType {
    Market,
    Limit,
    PostOnly,
    Fok,
    Ioc,
    OptimalLimitIoc,
}

impl OrderType {
    /// Whether the order type needs an explicit price
    pub fn requires_price(&self) -> bool {
        !matches!(self, OrderType::Market | OrderType::OptimalLimitIoc)
    }
}
