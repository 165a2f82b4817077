// ABOUTME: Transport-agnostic message routing for courier
// ABOUTME: Provides delivery queues, identity caching, conversation lookup and the router

pub mod config;
pub mod conversation;
pub mod delivery;
pub mod format;
pub mod identity;
pub mod metrics;
pub mod paths;
pub mod router;
pub mod secrets;
pub mod traits;

pub use config::Config;
pub use conversation::{Conversation, ConversationRegistry, ConversationResolver};
pub use delivery::{OutboundQueue, OutgoingQueueItem};
pub use identity::{IdentityCache, IdentityResolver};
pub use router::{IgnoreReason, RouteOutcome, Router, RouterOptions, TransportBinding};
pub use traits::{InboundMessage, Transport};

// Re-export courier-agent types
pub use courier_agent::{WorkerConfig, WorkerError, WorkerRunner};
