//! Book feed client.
//!
//! This module handles:
//! - The JSON wire format (commands, confirmations, data frames)
//! - The socket transport and connection lifecycle
//! - Subscribing one product at a time
//! - Filtering and throttling data frames for the consumer
//! - Resubscribing with backoff when the feed drops

pub mod codec;
pub mod connection;
pub mod listeners;
pub mod reconnect;
pub mod router;
pub mod subscription;
pub mod throttle;
pub mod transport;

pub use codec::{Command, Confirmation, FeedData, FeedKind, FeedTags, Inbound};
pub use connection::{ConnectionState, FeedConnection};
pub use reconnect::{maintain_subscription, ReconnectConfig};
pub use router::{FeedHandler, HandlerSlot, MessageRouter, RouteOutcome};
pub use subscription::{SubscriptionManager, SubscriptionState, TeardownHook};
pub use throttle::Throttle;
pub use transport::{ChannelConnector, Connector, PeerSocket, SocketEvent, TungsteniteConnector};
