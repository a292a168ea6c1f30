use async_trait::async_trait;

use crate::Result;

/// Outbound side of the chat connection.
///
/// The protocol connection itself belongs to an adapter (console, IRC client, ...).
/// Everything in the core that talks back to users or to the authority goes through here.
#[async_trait]
pub trait ChatPort: Send + Sync {
    /// Send a directed message to a channel or a single identity.
    async fn send_message(&self, target: &str, text: &str) -> Result<()>;
}
