use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use chanbot_core::{
    auth::PrivilegedExecutionGate,
    dispatch::CommandHandler,
    domain::{Command, CommandEvent},
    Result,
};

/// Bot administration.
///
/// `say` and `quit` are privileged and only reach this handler through the gate.
/// `logout` is open to everyone: it only ever drops the caller's own authentication.
pub struct AdminHandler {
    gate: Arc<PrivilegedExecutionGate>,
    shutdown: CancellationToken,
}

impl AdminHandler {
    pub fn new(gate: Arc<PrivilegedExecutionGate>, shutdown: CancellationToken) -> Self {
        Self { gate, shutdown }
    }

    async fn say(&self, event: &CommandEvent) -> Result<bool> {
        let parsed = event
            .args()
            .and_then(|a| a.split_once(char::is_whitespace))
            .map(|(target, text)| (target, text.trim()))
            .filter(|(_, text)| !text.is_empty());
        let Some((target, text)) = parsed else {
            event.respond("Usage: say <target> <text>").await?;
            return Ok(true);
        };

        tracing::info!(nick = event.sender(), target, "say");
        event.event.port().send_message(target, text).await?;
        Ok(true)
    }

    async fn logout(&self, event: &CommandEvent) -> Result<bool> {
        let reply = if self.gate.revoke(event.sender()) {
            "Logged out."
        } else {
            "You were not logged in."
        };
        event.respond(reply).await?;
        Ok(true)
    }

    async fn quit(&self, event: &CommandEvent) -> Result<bool> {
        tracing::info!(nick = event.sender(), "shutdown requested");
        event.respond("Bye.").await?;
        self.shutdown.cancel();
        Ok(true)
    }
}

#[async_trait]
impl CommandHandler for AdminHandler {
    fn commands(&self) -> Vec<Command> {
        vec![
            Command::privileged("say", "say <target> <text>"),
            Command::privileged("quit", "quit"),
            Command::new("logout", "logout"),
        ]
    }

    async fn on_command(&self, event: CommandEvent) -> Result<bool> {
        match event.command.token.as_str() {
            "say" => self.say(&event).await,
            "logout" => self.logout(&event).await,
            "quit" => self.quit(&event).await,
            _ => Ok(false),
        }
    }
}
