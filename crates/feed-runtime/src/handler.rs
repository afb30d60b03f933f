use async_trait::async_trait;
use feed_core::{ChangeEvent, HandlerError};

/// Application callback invoked once per delivered event, in feed order.
///
/// Delivery is at-least-once: after a reconnect the same event may arrive
/// again, so implementations must tolerate duplicates.
#[async_trait]
pub trait EventHandler: Send + Sync {
    async fn handle(&self, event: &ChangeEvent) -> Result<(), HandlerError>;
}

/// [`EventHandler`] backed by a synchronous closure.
pub struct FnHandler<F>(F);

/// Wrap a closure as an [`EventHandler`].
pub fn handler_fn<F>(f: F) -> FnHandler<F>
where
    F: Fn(&ChangeEvent) -> Result<(), HandlerError> + Send + Sync,
{
    FnHandler(f)
}

#[async_trait]
impl<F> EventHandler for FnHandler<F>
where
    F: Fn(&ChangeEvent) -> Result<(), HandlerError> + Send + Sync,
{
    async fn handle(&self, event: &ChangeEvent) -> Result<(), HandlerError> {
        (self.0)(event)
    }
}
