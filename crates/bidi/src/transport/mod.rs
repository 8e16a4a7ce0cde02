//! RPC transport core: frame types, correlation, socket wiring

mod connection;
mod protocol;
mod ws;

pub use connection::{Connection, ConnectionConfig, EventCallback, Outbound, SubscriptionId};
pub use protocol::{
    CommandEnvelope, CommandId, ErrorFrame, EventFrame, IncomingFrame, SuccessFrame,
};
pub use ws::connect;
