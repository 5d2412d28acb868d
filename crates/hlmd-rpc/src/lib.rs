//! Local RPC surface of the daemon.
//!
//! [`protocol`] decodes newline-delimited JSON requests into typed calls,
//! [`gateway`] applies rate limiting, session auth and routing, and the
//! remaining modules hold the in-memory state the gateway serves.

pub mod error;
pub mod gateway;
pub mod orders;
pub mod protocol;
pub mod rate_limiter;
pub mod session;

pub use error::{ProtocolError, RpcError, RpcResult};
pub use gateway::{DaemonInfo, GatewayConfig, RequestContext, RpcGateway, REQUESTS_COUNTER};
pub use orders::OrderBook;
pub use protocol::{
    decode_line, decode_value, Category, DecodeError, Method, MethodCall, MetricsFormat,
    RpcRequest, RpcResponse, FALLBACK_ID,
};
pub use rate_limiter::FixedWindowLimiter;
pub use session::SessionTable;
