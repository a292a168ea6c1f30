use std::{
    fmt,
    hash::{Hash, Hasher},
    sync::Arc,
};

use crate::{ports::ChatPort, Result};

/// A channel message as delivered by the protocol collaborator.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct InboundMessage {
    pub channel: String,
    pub sender: String,
    pub text: String,
}

impl InboundMessage {
    pub fn new(
        channel: impl Into<String>,
        sender: impl Into<String>,
        text: impl Into<String>,
    ) -> Self {
        Self {
            channel: channel.into(),
            sender: sender.into(),
            text: text.into(),
        }
    }
}

/// A notice-type message. Only notices from the authority carry meaning.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Notice {
    pub sender: String,
    pub text: String,
}

impl Notice {
    pub fn new(sender: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            sender: sender.into(),
            text: text.into(),
        }
    }
}

/// A registered command. Identity is the token alone.
#[derive(Clone, Debug)]
pub struct Command {
    pub token: String,
    pub usage: String,
    pub privileged: bool,
}

impl Command {
    pub fn new(token: impl Into<String>, usage: impl Into<String>) -> Self {
        Self {
            token: token.into(),
            usage: usage.into(),
            privileged: false,
        }
    }

    pub fn privileged(token: impl Into<String>, usage: impl Into<String>) -> Self {
        Self {
            privileged: true,
            ..Self::new(token, usage)
        }
    }
}

impl PartialEq for Command {
    fn eq(&self, other: &Self) -> bool {
        self.token == other.token
    }
}

impl Eq for Command {}

impl Hash for Command {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.token.hash(state);
    }
}

/// An inbound message together with the capability to answer it.
#[derive(Clone)]
pub struct MessageEvent {
    pub message: InboundMessage,
    port: Arc<dyn ChatPort>,
}

impl MessageEvent {
    pub fn new(message: InboundMessage, port: Arc<dyn ChatPort>) -> Self {
        Self { message, port }
    }

    pub fn sender(&self) -> &str {
        &self.message.sender
    }

    pub fn channel(&self) -> &str {
        &self.message.channel
    }

    pub fn port(&self) -> &Arc<dyn ChatPort> {
        &self.port
    }

    /// Answer in the originating channel, addressed to the sender.
    pub async fn respond(&self, text: &str) -> Result<()> {
        let line = format!("{}: {text}", self.message.sender);
        self.port.send_message(&self.message.channel, &line).await
    }
}

impl fmt::Debug for MessageEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MessageEvent")
            .field("message", &self.message)
            .finish_non_exhaustive()
    }
}

/// A command-shaped message resolved against the command table.
#[derive(Clone, Debug)]
pub struct CommandEvent {
    pub event: MessageEvent,
    pub command: Command,
    pub args: Option<String>,
}

impl CommandEvent {
    pub fn sender(&self) -> &str {
        self.event.sender()
    }

    pub fn args(&self) -> Option<&str> {
        self.args.as_deref()
    }

    pub async fn respond(&self, text: &str) -> Result<()> {
        self.event.respond(text).await
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use super::*;

    #[test]
    fn commands_compare_by_token_only() {
        let a = Command::new("say", "say <text>");
        let b = Command::privileged("say", "something else entirely");
        assert_eq!(a, b);

        let mut set = HashSet::new();
        set.insert(a);
        assert!(!set.insert(b));
        assert!(set.insert(Command::new("help", "help")));
    }
}
