//! Reconnecting change-feed consumer runtime.
//!
//! A [`FeedConsumer`] drives a [`ReconnectScheduler`], which opens one
//! [`FeedSession`] at a time against a [`ChangeFeedSource`], hands every
//! event to an [`EventHandler`], and resumes from the last handled position
//! after transient failures. [`ShutdownCoordinator`] wires OS termination
//! signals to an orderly stop.

mod checkpoint;
mod consumer;
mod handler;
pub mod memory;
mod scheduler;
mod session;
mod shutdown;
mod source;

pub use checkpoint::Checkpointer;
pub use consumer::{ConsumerConfig, FeedConsumer};
pub use handler::{EventHandler, FnHandler, handler_fn};
pub use memory::{ScriptEnd, ScriptedFeedSource, SubscriptionScript};
pub use scheduler::ReconnectScheduler;
pub use session::FeedSession;
pub use shutdown::ShutdownCoordinator;
pub use source::{ChangeFeedSource, EventStream, StreamAdapter, StreamItem};
