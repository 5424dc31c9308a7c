//! Wire forms exchanged with the transport front.

mod flow;
mod jsonrpc;

pub use flow::*;
pub use jsonrpc::*;

/// JSON-RPC method for the authorize phase.
pub const AUTHORIZE_METHOD: &str = "authorize";
/// JSON-RPC method for the exchange phase.
pub const EXCHANGE_METHOD: &str = "exchange";
