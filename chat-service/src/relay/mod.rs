//! Streaming completion relay.
//!
//! Forwards provider fragments to a client while checkpointing the growing
//! reply, and finalizes exactly once however the stream ends.

pub mod channel;
pub mod checkpoint;
pub mod coordinator;
pub mod session;

pub use channel::{sse_events, ChannelClosed, ClientChannel, Frame};
pub use checkpoint::CheckpointScheduler;
pub use coordinator::{
    provider_history, Relay, RelayCoordinator, RelayOutcome, RelayReport, RelaySettings,
    RelayState, StreamRequest, TIMEOUT_MESSAGE,
};
pub use session::RelaySession;
