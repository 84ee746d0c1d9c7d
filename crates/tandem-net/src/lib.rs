// Session layer: identity acquisition and the single peer session, over an
// external peer-connection substrate.

pub mod manager;
pub mod memory;
pub mod substrate;

pub use manager::{
    ConnectionEvent, ConnectionManager, ConnectionStatus, IdentityOutcome, SessionState,
};
pub use memory::MemoryBroker;
pub use substrate::{
    ChannelEvent, ChannelSink, DataChannel, Registration, Substrate, SubstrateError,
    SubstrateEvent,
};
