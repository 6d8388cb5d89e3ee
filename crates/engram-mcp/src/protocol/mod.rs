//! Wire protocol for the stdio tool surface.

pub mod stdio;
pub mod types;

pub use stdio::StdioTransport;
pub use types::{JsonRpcError, JsonRpcRequest, JsonRpcResponse, PROTOCOL_VERSION};
