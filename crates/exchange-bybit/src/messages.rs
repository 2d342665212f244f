//! Streaming wire frames: outbound control and order frames, inbound classification.
//!
//! Private-stream acknowledgements carry `success` / `ret_msg`; trade-stream
//! acknowledgements carry `retCode` / `retMsg`. Both shapes are accepted.

use crate::error::{BybitError, Result};
use crate::signing::WsAuth;
use funding_sniper_core::{
    format_decimal, OrderKind, OrderRequest, OrderStatus, OrderType, OrderUpdate, Side,
};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use tracing::warn;

/// Order-update topic for linear contracts.
pub const ORDER_TOPIC: &str = "order.linear";

#[derive(Debug, Serialize)]
struct ControlFrame<A: Serialize> {
    op: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    args: Option<A>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct OrderCreateFrame<'a> {
    req_id: &'a str,
    op: &'static str,
    header: OrderHeader,
    args: [OrderParams<'a>; 1],
}

#[derive(Debug, Serialize)]
struct OrderHeader {
    #[serde(rename = "X-BAPI-TIMESTAMP")]
    timestamp: String,
}

/// Parameters of one `order.create` request.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderParams<'a> {
    category: &'static str,
    symbol: &'a str,
    side: &'static str,
    order_type: &'static str,
    qty: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    price: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    trigger_price: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    trigger_direction: Option<u8>,
    #[serde(skip_serializing_if = "Option::is_none")]
    reduce_only: Option<bool>,
}

impl<'a> OrderParams<'a> {
    #[must_use]
    pub fn from_request(order: &'a OrderRequest) -> Self {
        let mut params = Self {
            category: "linear",
            symbol: &order.symbol,
            side: order.side.as_str(),
            order_type: "Market",
            qty: format_decimal(order.quantity),
            price: None,
            trigger_price: None,
            trigger_direction: None,
            reduce_only: None,
        };

        match order.kind {
            OrderKind::Market => {}
            OrderKind::ReduceOnlyLimit { price } => {
                params.order_type = "Limit";
                params.price = Some(format_decimal(price));
                params.reduce_only = Some(true);
            }
            OrderKind::ReduceOnlyStop { trigger_price } => {
                // A buy-side stop protects a short and fires on a rise (1);
                // a sell-side stop protects a long and fires on a fall (2).
                let direction = match order.side {
                    Side::Buy => 1,
                    Side::Sell => 2,
                };
                params.order_type = "Limit";
                params.price = Some(format_decimal(trigger_price));
                params.trigger_price = Some(format_decimal(trigger_price));
                params.trigger_direction = Some(direction);
                params.reduce_only = Some(true);
            }
        }

        params
    }
}

/// `{"op":"auth","args":[apiKey, expires, signature]}`
///
/// # Errors
///
/// Returns error if serialization fails.
pub fn auth_frame(auth: &WsAuth) -> Result<String> {
    let frame = ControlFrame {
        op: "auth",
        args: Some((&auth.api_key, auth.expires, &auth.signature)),
    };
    Ok(serde_json::to_string(&frame)?)
}

/// # Errors
///
/// Returns error if serialization fails.
pub fn subscribe_frame(topics: &[&str]) -> Result<String> {
    let frame = ControlFrame {
        op: "subscribe",
        args: Some(topics),
    };
    Ok(serde_json::to_string(&frame)?)
}

#[must_use]
pub fn ping_frame() -> String {
    r#"{"op":"ping"}"#.to_string()
}

/// `{"reqId":..,"op":"order.create","header":{"X-BAPI-TIMESTAMP":..},"args":[params]}`
///
/// # Errors
///
/// Returns error if serialization fails.
pub fn order_create_frame(req_id: &str, timestamp_ms: i64, order: &OrderRequest) -> Result<String> {
    let frame = OrderCreateFrame {
        req_id,
        op: "order.create",
        header: OrderHeader {
            timestamp: timestamp_ms.to_string(),
        },
        args: [OrderParams::from_request(order)],
    };
    Ok(serde_json::to_string(&frame)?)
}

/// A classified inbound frame.
#[derive(Debug, Clone, PartialEq)]
pub enum Inbound {
    Auth { success: bool, message: String },
    Subscribe { success: bool, message: String },
    Pong,
    OrderAck {
        req_id: Option<String>,
        ret_code: i64,
        ret_msg: String,
    },
    OrderUpdates(Vec<OrderUpdate>),
    Unknown,
}

#[derive(Debug, Deserialize)]
struct RawFrame {
    #[serde(default)]
    op: Option<String>,
    #[serde(default)]
    topic: Option<String>,
    #[serde(default)]
    success: Option<bool>,
    #[serde(default)]
    ret_msg: Option<String>,
    #[serde(default, rename = "retCode")]
    ret_code: Option<i64>,
    #[serde(default, rename = "retMsg")]
    ret_msg_camel: Option<String>,
    #[serde(default, rename = "reqId")]
    req_id: Option<String>,
    #[serde(default)]
    data: Option<serde_json::Value>,
}

impl RawFrame {
    fn succeeded(&self) -> bool {
        self.success.unwrap_or(self.ret_code == Some(0))
    }

    fn message(&self) -> String {
        self.ret_msg
            .clone()
            .or_else(|| self.ret_msg_camel.clone())
            .unwrap_or_default()
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawOrder {
    #[serde(default)]
    symbol: String,
    #[serde(default)]
    side: String,
    #[serde(default)]
    order_type: String,
    #[serde(default)]
    order_status: String,
    #[serde(default)]
    qty: String,
    #[serde(default)]
    avg_price: String,
}

impl RawOrder {
    fn into_update(self) -> Result<OrderUpdate> {
        let quantity = Decimal::from_str(&self.qty)
            .map_err(|e| BybitError::Decode(format!("qty {:?}: {e}", self.qty)))?;

        Ok(OrderUpdate {
            side: Side::parse(&self.side),
            order_type: OrderType::parse(&self.order_type),
            status: OrderStatus::parse(&self.order_status),
            quantity,
            avg_price: Decimal::from_str(&self.avg_price).ok(),
            symbol: self.symbol,
        })
    }
}

fn decode_order(element: &serde_json::Value) -> Result<OrderUpdate> {
    RawOrder::deserialize(element)?.into_update()
}

/// Classifies one text frame.
///
/// # Errors
///
/// Returns [`BybitError::Decode`] for malformed JSON. A single order event
/// that cannot be decoded is logged and skipped; the rest of its batch is kept.
pub fn parse_inbound(text: &str) -> Result<Inbound> {
    let frame: RawFrame = serde_json::from_str(text)?;

    if let Some(topic) = frame.topic.as_deref() {
        if topic == ORDER_TOPIC || topic == "order" {
            let elements: Vec<serde_json::Value> = match frame.data {
                Some(data) => serde_json::from_value(data)?,
                None => Vec::new(),
            };
            let updates = elements
                .into_iter()
                .filter_map(|element| match decode_order(&element) {
                    Ok(update) => Some(update),
                    Err(e) => {
                        warn!(error = %e, raw = %element, "dropping undecodable order event");
                        None
                    }
                })
                .collect();
            return Ok(Inbound::OrderUpdates(updates));
        }
        return Ok(Inbound::Unknown);
    }

    let inbound = match frame.op.as_deref() {
        Some("pong") => Inbound::Pong,
        Some("ping") if frame.message() == "pong" => Inbound::Pong,
        Some("auth") => Inbound::Auth {
            success: frame.succeeded(),
            message: frame.message(),
        },
        Some("subscribe") => Inbound::Subscribe {
            success: frame.succeeded(),
            message: frame.message(),
        },
        Some("order.create") => Inbound::OrderAck {
            ret_code: frame.ret_code.unwrap_or_default(),
            ret_msg: frame.message(),
            req_id: frame.req_id,
        },
        _ => Inbound::Unknown,
    };
    Ok(inbound)
}
