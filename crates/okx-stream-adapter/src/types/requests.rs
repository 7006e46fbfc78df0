/*
[INPUT]:  Subscription scoping and order parameters from callers
[OUTPUT]: Typed Rust request structs with serialization and validation
[POS]:    Data layer - outbound argument types
[UPDATE]: When request schema changes or new arguments are needed
*/

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::enums::{Channel, InstType, OrderType, PosSide, Side, TradeMode};
use crate::error::{OkxError, Result};

/// Largest item count the server accepts in one batch operation
pub const MAX_BATCH_ITEMS: usize = 20;

/// Subscription descriptor: a channel plus its scoping attributes.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubscriptionArg {
    pub channel: Channel,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub inst_type: Option<InstType>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub inst_family: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uly: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub inst_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub account_id: Option<String>,
}

impl SubscriptionArg {
    pub fn new(channel: Channel) -> Self {
        Self {
            channel,
            inst_type: None,
            inst_family: None,
            uly: None,
            inst_id: None,
            account_id: None,
        }
    }

    /// Descriptor scoped to one instrument
    pub fn instrument(channel: Channel, inst_id: impl Into<String>) -> Self {
        Self::new(channel).with_inst_id(inst_id)
    }

    pub fn with_inst_id(mut self, inst_id: impl Into<String>) -> Self {
        self.inst_id = Some(inst_id.into());
        self
    }

    pub fn with_inst_type(mut self, inst_type: InstType) -> Self {
        self.inst_type = Some(inst_type);
        self
    }

    pub fn with_inst_family(mut self, inst_family: impl Into<String>) -> Self {
        self.inst_family = Some(inst_family.into());
        self
    }

    pub fn with_uly(mut self, uly: impl Into<String>) -> Self {
        self.uly = Some(uly.into());
        self
    }

    pub fn with_account_id(mut self, account_id: impl Into<String>) -> Self {
        self.account_id = Some(account_id.into());
        self
    }

    /// Canonical identity used for deduplication and ack matching.
    pub fn key(&self) -> String {
        let inst_type = self
            .inst_type
            .and_then(|t| serde_json::to_value(t).ok())
            .and_then(|v| v.as_str().map(str::to_string))
            .unwrap_or_default();
        format!(
            "{}|{}|{}|{}|{}|{}",
            self.channel.as_str(),
            inst_type,
            self.inst_family.as_deref().unwrap_or(""),
            self.uly.as_deref().unwrap_or(""),
            self.inst_id.as_deref().unwrap_or(""),
            self.account_id.as_deref().unwrap_or(""),
        )
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlaceOrderRequest {
    pub inst_id: String,
    pub td_mode: TradeMode,
    pub side: Side,
    pub ord_type: OrderType,
    #[serde(with = "rust_decimal::serde::str")]
    pub sz: Decimal,
    #[serde(
        default,
        with = "rust_decimal::serde::str_option",
        skip_serializing_if = "Option::is_none"
    )]
    pub px: Option<Decimal>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pos_side: Option<PosSide>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cl_ord_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tag: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reduce_only: Option<bool>,
}

impl PlaceOrderRequest {
    /// Limit order with the required fields set
    pub fn limit(
        inst_id: impl Into<String>,
        td_mode: TradeMode,
        side: Side,
        sz: Decimal,
        px: Decimal,
    ) -> Self {
        Self {
            inst_id: inst_id.into(),
            td_mode,
            side,
            ord_type: OrderType::Limit,
            sz,
            px: Some(px),
            pos_side: None,
            cl_ord_id: None,
            tag: None,
            reduce_only: None,
        }
    }

    /// Market order with the required fields set
    pub fn market(inst_id: impl Into<String>, td_mode: TradeMode, side: Side, sz: Decimal) -> Self {
        Self {
            inst_id: inst_id.into(),
            td_mode,
            side,
            ord_type: OrderType::Market,
            sz,
            px: None,
            pos_side: None,
            cl_ord_id: None,
            tag: None,
            reduce_only: None,
        }
    }

    pub fn with_cl_ord_id(mut self, cl_ord_id: impl Into<String>) -> Self {
        self.cl_ord_id = Some(cl_ord_id.into());
        self
    }

    pub fn validate(&self) -> Result<()> {
        require_non_empty("instId", &self.inst_id)?;
        if self.sz <= Decimal::ZERO {
            return Err(OkxError::InvalidArgument(format!(
                "sz must be positive, got {}",
                self.sz
            )));
        }
        if self.ord_type.requires_price() {
            match self.px {
                Some(px) if px > Decimal::ZERO => {}
                _ => {
                    return Err(OkxError::InvalidArgument(
                        "px is required for priced order types".to_string(),
                    ));
                }
            }
        }
        if let Some(cl_ord_id) = &self.cl_ord_id {
            validate_client_id("clOrdId", cl_ord_id)?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CancelOrderRequest {
    pub inst_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ord_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cl_ord_id: Option<String>,
}

impl CancelOrderRequest {
    pub fn by_ord_id(inst_id: impl Into<String>, ord_id: impl Into<String>) -> Self {
        Self {
            inst_id: inst_id.into(),
            ord_id: Some(ord_id.into()),
            cl_ord_id: None,
        }
    }

    pub fn by_cl_ord_id(inst_id: impl Into<String>, cl_ord_id: impl Into<String>) -> Self {
        Self {
            inst_id: inst_id.into(),
            ord_id: None,
            cl_ord_id: Some(cl_ord_id.into()),
        }
    }

    pub fn validate(&self) -> Result<()> {
        require_non_empty("instId", &self.inst_id)?;
        require_order_ref(self.ord_id.as_deref(), self.cl_ord_id.as_deref())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AmendOrderRequest {
    pub inst_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ord_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cl_ord_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub req_id: Option<String>,
    #[serde(
        default,
        with = "rust_decimal::serde::str_option",
        skip_serializing_if = "Option::is_none"
    )]
    pub new_sz: Option<Decimal>,
    #[serde(
        default,
        with = "rust_decimal::serde::str_option",
        skip_serializing_if = "Option::is_none"
    )]
    pub new_px: Option<Decimal>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cxl_on_fail: Option<bool>,
}

impl AmendOrderRequest {
    pub fn new(inst_id: impl Into<String>, ord_id: impl Into<String>) -> Self {
        Self {
            inst_id: inst_id.into(),
            ord_id: Some(ord_id.into()),
            cl_ord_id: None,
            req_id: None,
            new_sz: None,
            new_px: None,
            cxl_on_fail: None,
        }
    }

    pub fn with_new_px(mut self, px: Decimal) -> Self {
        self.new_px = Some(px);
        self
    }

    pub fn with_new_sz(mut self, sz: Decimal) -> Self {
        self.new_sz = Some(sz);
        self
    }

    pub fn validate(&self) -> Result<()> {
        require_non_empty("instId", &self.inst_id)?;
        require_order_ref(self.ord_id.as_deref(), self.cl_ord_id.as_deref())?;
        if self.new_sz.is_none() && self.new_px.is_none() {
            return Err(OkxError::InvalidArgument(
                "amend needs newSz or newPx".to_string(),
            ));
        }
        if let Some(req_id) = &self.req_id {
            validate_client_id("reqId", req_id)?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MassCancelRequest {
    pub inst_type: InstType,
    pub inst_family: String,
}

impl MassCancelRequest {
    pub fn validate(&self) -> Result<()> {
        require_non_empty("instFamily", &self.inst_family)
    }
}

/// Reject empty or oversized batches before any I/O
pub(crate) fn validate_batch_len(len: usize) -> Result<()> {
    if len == 0 {
        return Err(OkxError::InvalidArgument("batch is empty".to_string()));
    }
    if len > MAX_BATCH_ITEMS {
        return Err(OkxError::InvalidArgument(format!(
            "batch has {len} items, limit is {MAX_BATCH_ITEMS}"
        )));
    }
    Ok(())
}

fn require_non_empty(field: &str, value: &str) -> Result<()> {
    if value.trim().is_empty() {
        return Err(OkxError::InvalidArgument(format!("{field} is required")));
    }
    Ok(())
}

fn require_order_ref(ord_id: Option<&str>, cl_ord_id: Option<&str>) -> Result<()> {
    let has = |v: Option<&str>| v.is_some_and(|s| !s.trim().is_empty());
    if !has(ord_id) && !has(cl_ord_id) {
        return Err(OkxError::InvalidArgument(
            "either ordId or clOrdId is required".to_string(),
        ));
    }
    Ok(())
}

// Client-supplied ids: 1-32 alphanumeric characters.
fn validate_client_id(field: &str, value: &str) -> Result<()> {
    let valid = !value.is_empty()
        && value.len() <= 32
        && value.chars().all(|c| c.is_ascii_alphanumeric());
    if !valid {
        return Err(OkxError::InvalidArgument(format!(
            "{field} must be 1-32 alphanumeric characters"
        )));
    }
    Ok(())
}
