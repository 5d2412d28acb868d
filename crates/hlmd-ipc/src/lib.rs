//! Local IPC transport for the RPC gateway.

pub mod error;
pub mod framer;
pub mod listener;

pub use error::{IpcError, IpcResult};
pub use framer::{Frame, LineFramer, MAX_LINE_BYTES};
pub use listener::{respond, IpcListener};
