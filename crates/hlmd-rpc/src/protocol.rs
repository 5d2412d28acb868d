//! Wire protocol: one JSON object per line in each direction.
//!
//! Request: `{"id": string, "method": string, "params"?: object}`
//! Response: `{"id", "result"?, "error"?, "cached_at"?, "trace_id"?}`
//!
//! Decoding happens in two stages. [`decode_line`] checks the envelope (JSON,
//! id, known method, object params) and is applied before the gateway sees
//! anything. [`MethodCall::parse`] then maps the params of a known method to
//! its typed variant once the request has passed rate and auth checks.

use crate::error::ProtocolError;
use hlmd_core::OrderSide;
use rust_decimal::Decimal;
use serde::Serialize;
use serde_json::{Map, Value};
use std::fmt;
use std::str::FromStr;

/// Id used when none can be salvaged from a bad line.
pub const FALLBACK_ID: &str = "0";

/// Method grouping used for metric labels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Category {
    Auth,
    Data,
    Trade,
    System,
}

impl Category {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Auth => "auth",
            Self::Data => "data",
            Self::Trade => "trade",
            Self::System => "system",
        }
    }
}

/// Every method the daemon understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Method {
    Login,
    GetDashboard,
    GetPrices,
    GetAssetCtxs,
    GetPerpMeta,
    GetSpotMeta,
    GetSpotAssetCtxs,
    PlaceOrder,
    CancelOrder,
    GetStatus,
    GetMetrics,
    Shutdown,
}

impl Method {
    pub const ALL: [Method; 12] = [
        Self::Login,
        Self::GetDashboard,
        Self::GetPrices,
        Self::GetAssetCtxs,
        Self::GetPerpMeta,
        Self::GetSpotMeta,
        Self::GetSpotAssetCtxs,
        Self::PlaceOrder,
        Self::CancelOrder,
        Self::GetStatus,
        Self::GetMetrics,
        Self::Shutdown,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Login => "login",
            Self::GetDashboard => "getDashboard",
            Self::GetPrices => "getPrices",
            Self::GetAssetCtxs => "getAssetCtxs",
            Self::GetPerpMeta => "getPerpMeta",
            Self::GetSpotMeta => "getSpotMeta",
            Self::GetSpotAssetCtxs => "getSpotAssetCtxs",
            Self::PlaceOrder => "placeOrder",
            Self::CancelOrder => "cancelOrder",
            Self::GetStatus => "getStatus",
            Self::GetMetrics => "getMetrics",
            Self::Shutdown => "shutdown",
        }
    }

    pub fn category(&self) -> Category {
        match self {
            Self::Login => Category::Auth,
            Self::GetDashboard
            | Self::GetPrices
            | Self::GetAssetCtxs
            | Self::GetPerpMeta
            | Self::GetSpotMeta
            | Self::GetSpotAssetCtxs => Category::Data,
            Self::PlaceOrder | Self::CancelOrder => Category::Trade,
            Self::GetStatus | Self::GetMetrics | Self::Shutdown => Category::System,
        }
    }

    /// Methods that need a valid `authToken` param.
    pub fn requires_auth(&self) -> bool {
        matches!(
            self,
            Self::GetDashboard | Self::PlaceOrder | Self::CancelOrder
        )
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Method {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|m| m.as_str() == s)
            .ok_or_else(|| ProtocolError::UnknownMethod(s.to_string()))
    }
}

/// A request whose envelope is valid.
#[derive(Debug, Clone, PartialEq)]
pub struct RpcRequest {
    pub id: String,
    pub method: Method,
    pub params: Map<String, Value>,
}

impl RpcRequest {
    pub fn new(id: impl Into<String>, method: Method, params: Value) -> Self {
        let params = match params {
            Value::Object(map) => map,
            _ => Map::new(),
        };
        Self {
            id: id.into(),
            method,
            params,
        }
    }
}

/// Response line. Exactly one of `result` and `error` is set.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RpcResponse {
    pub id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// `updatedAt` of the cache entry the result was read from.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cached_at: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trace_id: Option<String>,
}

impl RpcResponse {
    pub fn success(id: impl Into<String>, result: Value) -> Self {
        Self {
            id: id.into(),
            result: Some(result),
            error: None,
            cached_at: None,
            trace_id: None,
        }
    }

    pub fn failure(id: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            result: None,
            error: Some(error.into()),
            cached_at: None,
            trace_id: None,
        }
    }

    pub fn with_cached_at(mut self, cached_at: Option<u64>) -> Self {
        self.cached_at = cached_at;
        self
    }

    pub fn with_trace_id(mut self, trace_id: impl Into<String>) -> Self {
        self.trace_id = Some(trace_id.into());
        self
    }

    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }

    /// Serialize as one line, without the trailing newline.
    pub fn to_line(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|e| {
            format!(
                r#"{{"id":{},"error":"Internal error: {}"}}"#,
                Value::String(self.id.clone()),
                e
            )
        })
    }
}

/// A rejected line plus the id to answer with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodeError {
    pub id: String,
    pub error: ProtocolError,
}

impl DecodeError {
    pub fn new(id: impl Into<String>, error: ProtocolError) -> Self {
        Self {
            id: id.into(),
            error,
        }
    }
}

/// Decode one framed line.
pub fn decode_line(line: &str) -> Result<RpcRequest, DecodeError> {
    let value: Value = serde_json::from_str(line)
        .map_err(|e| DecodeError::new(FALLBACK_ID, ProtocolError::InvalidJson(e.to_string())))?;
    decode_value(value)
}

/// Validate the envelope of an already parsed JSON value.
pub fn decode_value(value: Value) -> Result<RpcRequest, DecodeError> {
    let Value::Object(mut object) = value else {
        return Err(DecodeError::new(FALLBACK_ID, ProtocolError::NotAnObject));
    };

    let id = match object.get("id") {
        Some(Value::String(id)) => id.clone(),
        Some(Value::Number(n)) => return Err(DecodeError::new(n.to_string(), ProtocolError::InvalidId)),
        _ => return Err(DecodeError::new(FALLBACK_ID, ProtocolError::InvalidId)),
    };

    let method = match object.get("method") {
        Some(Value::String(name)) => name
            .parse::<Method>()
            .map_err(|e| DecodeError::new(id.clone(), e))?,
        _ => return Err(DecodeError::new(id, ProtocolError::MissingMethod)),
    };

    let params = match object.remove("params") {
        None | Some(Value::Null) => Map::new(),
        Some(Value::Object(params)) => params,
        Some(_) => return Err(DecodeError::new(id, ProtocolError::ParamsNotObject)),
    };

    Ok(RpcRequest { id, method, params })
}

/// Output format for `getMetrics`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetricsFormat {
    Json,
    Prometheus,
}

/// A request's params mapped to exactly what its method needs.
#[derive(Debug, Clone, PartialEq)]
pub enum MethodCall {
    Login { wallet: String },
    GetDashboard,
    GetPrices { coin: Option<String> },
    GetAssetCtxs,
    GetPerpMeta,
    GetSpotMeta,
    GetSpotAssetCtxs,
    PlaceOrder { coin: String, side: OrderSide, size: Decimal },
    CancelOrder { order_id: String },
    GetStatus,
    GetMetrics { format: MetricsFormat },
    Shutdown,
}

impl MethodCall {
    /// Validate `params` for `method`. The error is the client-facing message.
    pub fn parse(method: Method, params: &Map<String, Value>) -> Result<Self, String> {
        let call = match method {
            Method::Login => Self::Login {
                wallet: required_string(params, "wallet")?,
            },
            Method::GetDashboard => Self::GetDashboard,
            Method::GetPrices => Self::GetPrices {
                coin: optional_string(params, "coin")?,
            },
            Method::GetAssetCtxs => Self::GetAssetCtxs,
            Method::GetPerpMeta => Self::GetPerpMeta,
            Method::GetSpotMeta => Self::GetSpotMeta,
            Method::GetSpotAssetCtxs => Self::GetSpotAssetCtxs,
            Method::PlaceOrder => Self::PlaceOrder {
                coin: required_string(params, "coin")?,
                side: params
                    .get("side")
                    .and_then(Value::as_str)
                    .and_then(|s| s.parse::<OrderSide>().ok())
                    .ok_or_else(|| "side must be 'buy' or 'sell'".to_string())?,
                size: positive_decimal(params, "size")?,
            },
            Method::CancelOrder => Self::CancelOrder {
                order_id: required_string(params, "orderId")?,
            },
            Method::GetStatus => Self::GetStatus,
            Method::GetMetrics => Self::GetMetrics {
                format: match optional_string(params, "format")?.as_deref() {
                    None | Some("json") => MetricsFormat::Json,
                    Some("prometheus") => MetricsFormat::Prometheus,
                    Some(_) => return Err("format must be 'json' or 'prometheus'".to_string()),
                },
            },
            Method::Shutdown => Self::Shutdown,
        };
        Ok(call)
    }
}

fn required_string(params: &Map<String, Value>, name: &str) -> Result<String, String> {
    match params.get(name) {
        Some(Value::String(s)) if !s.trim().is_empty() => Ok(s.clone()),
        _ => Err(format!("{name} is required")),
    }
}

fn optional_string(params: &Map<String, Value>, name: &str) -> Result<Option<String>, String> {
    match params.get(name) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) => Ok(Some(s.clone())),
        Some(_) => Err(format!("{name} must be a string")),
    }
}

/// Accepts a JSON number or a numeric string; must be strictly positive.
fn positive_decimal(params: &Map<String, Value>, name: &str) -> Result<Decimal, String> {
    let invalid = || format!("{name} must be a positive number");
    let text = match params.get(name) {
        Some(Value::Number(n)) => n.to_string(),
        Some(Value::String(s)) => s.trim().to_string(),
        _ => return Err(invalid()),
    };
    let value = Decimal::from_str(&text)
        .or_else(|_| Decimal::from_scientific(&text))
        .map_err(|_| invalid())?;
    if value <= Decimal::ZERO {
        return Err(invalid());
    }
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use serde_json::json;

    fn params(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(map) => map,
            _ => panic!("params must be an object"),
        }
    }

    #[test]
    fn test_method_names_round_trip() {
        for method in Method::ALL {
            assert_eq!(method.as_str().parse::<Method>().unwrap(), method);
        }
    }

    #[test]
    fn test_auth_methods() {
        let protected: Vec<_> = Method::ALL.into_iter().filter(Method::requires_auth).collect();
        assert_eq!(
            protected,
            vec![Method::GetDashboard, Method::PlaceOrder, Method::CancelOrder]
        );
    }

    #[test]
    fn test_decode_valid_request() {
        let request = decode_line(r#"{"id":"7","method":"getPrices","params":{"coin":"btc"}}"#).unwrap();
        assert_eq!(request.id, "7");
        assert_eq!(request.method, Method::GetPrices);
        assert_eq!(request.params["coin"], "btc");

        let request = decode_line(r#"{"id":"8","method":"getStatus"}"#).unwrap();
        assert!(request.params.is_empty());
    }

    #[test]
    fn test_decode_invalid_json_uses_fallback_id() {
        let err = decode_line(r#"{"id":"1","met"#).unwrap_err();
        assert_eq!(err.id, FALLBACK_ID);
        assert!(matches!(err.error, ProtocolError::InvalidJson(_)));

        let err = decode_line("[1,2]").unwrap_err();
        assert_eq!(err.id, FALLBACK_ID);
        assert_eq!(err.error, ProtocolError::NotAnObject);
    }

    #[test]
    fn test_decode_unknown_method_names_it() {
        let err = decode_line(r#"{"id":"5","method":"dropTables"}"#).unwrap_err();
        assert_eq!(err.id, "5");
        assert_eq!(err.error.to_string(), "Unknown method: dropTables");
    }

    #[test]
    fn test_decode_salvages_id() {
        let err = decode_line(r#"{"id":"9","params":{}}"#).unwrap_err();
        assert_eq!(err, DecodeError::new("9", ProtocolError::MissingMethod));

        let err = decode_line(r#"{"id":"9","method":"ping2","params":[]}"#).unwrap_err();
        assert_eq!(err.error, ProtocolError::UnknownMethod("ping2".to_string()));

        let err = decode_line(r#"{"id":"9","method":"getStatus","params":[]}"#).unwrap_err();
        assert_eq!(err, DecodeError::new("9", ProtocolError::ParamsNotObject));

        let err = decode_line(r#"{"id":42,"method":"getStatus"}"#).unwrap_err();
        assert_eq!(err, DecodeError::new("42", ProtocolError::InvalidId));

        let err = decode_line(r#"{"method":"getStatus"}"#).unwrap_err();
        assert_eq!(err.id, FALLBACK_ID);
    }

    #[test]
    fn test_parse_place_order() {
        let call = MethodCall::parse(
            Method::PlaceOrder,
            &params(json!({"coin": "BTC", "side": "buy", "size": 1})),
        )
        .unwrap();
        assert_eq!(
            call,
            MethodCall::PlaceOrder {
                coin: "BTC".to_string(),
                side: OrderSide::Buy,
                size: dec!(1)
            }
        );

        let call = MethodCall::parse(
            Method::PlaceOrder,
            &params(json!({"coin": "ETH", "side": "sell", "size": "0.25"})),
        )
        .unwrap();
        assert!(matches!(call, MethodCall::PlaceOrder { size, .. } if size == dec!(0.25)));
    }

    #[test]
    fn test_parse_place_order_rejections() {
        let cases = [
            (json!({"side": "buy", "size": 1}), "coin is required"),
            (json!({"coin": "BTC", "side": "BUY", "size": 1}), "side must be 'buy' or 'sell'"),
            (json!({"coin": "BTC", "side": "long", "size": 1}), "side must be 'buy' or 'sell'"),
            (json!({"coin": "BTC", "side": "buy", "size": 0}), "size must be a positive number"),
            (json!({"coin": "BTC", "side": "buy", "size": -2}), "size must be a positive number"),
            (json!({"coin": "BTC", "side": "buy", "size": "abc"}), "size must be a positive number"),
            (json!({"coin": "BTC", "side": "buy"}), "size must be a positive number"),
        ];
        for (p, expected) in cases {
            assert_eq!(
                MethodCall::parse(Method::PlaceOrder, &params(p.clone())).unwrap_err(),
                expected,
                "{p}"
            );
        }
    }

    #[test]
    fn test_parse_get_metrics_format() {
        let json_call = MethodCall::parse(Method::GetMetrics, &Map::new()).unwrap();
        assert_eq!(json_call, MethodCall::GetMetrics { format: MetricsFormat::Json });

        let prom = MethodCall::parse(Method::GetMetrics, &params(json!({"format": "prometheus"})))
            .unwrap();
        assert_eq!(prom, MethodCall::GetMetrics { format: MetricsFormat::Prometheus });

        assert!(MethodCall::parse(Method::GetMetrics, &params(json!({"format": "xml"}))).is_err());
    }

    #[test]
    fn test_response_serialization() {
        let ok = RpcResponse::success("1", json!({"pong": true}))
            .with_cached_at(Some(1_700_000_000_000))
            .with_trace_id("t-1");
        let value: Value = serde_json::from_str(&ok.to_line()).unwrap();
        assert_eq!(
            value,
            json!({"id": "1", "result": {"pong": true}, "cached_at": 1_700_000_000_000u64, "trace_id": "t-1"})
        );

        let err = RpcResponse::failure("2", "Unauthorized");
        let value: Value = serde_json::from_str(&err.to_line()).unwrap();
        assert_eq!(value, json!({"id": "2", "error": "Unauthorized"}));
        assert!(err.is_error());
    }
}
