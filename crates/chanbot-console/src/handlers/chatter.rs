use async_trait::async_trait;

use chanbot_core::{dispatch::MessageHandler, domain::MessageEvent, Result};

/// Logs every line the bot sees. Never claims a message.
pub struct ChannelLog;

#[async_trait]
impl MessageHandler for ChannelLog {
    fn only_talk_channels(&self) -> bool {
        false
    }

    async fn on_message(&self, event: MessageEvent) -> Result<bool> {
        tracing::debug!(
            channel = event.channel(),
            nick = event.sender(),
            text = %event.message.text,
            "chat"
        );
        Ok(false)
    }
}

/// Answers lines addressed to the bot (`chanbot: ...`) with a pointer to `help`.
pub struct MentionHandler {
    bot_nick: String,
    prefix: char,
}

impl MentionHandler {
    pub fn new(bot_nick: impl Into<String>, prefix: char) -> Self {
        Self {
            bot_nick: bot_nick.into(),
            prefix,
        }
    }

    fn is_addressed(&self, text: &str) -> bool {
        let text = text.trim_start();
        let Some(head) = text.get(..self.bot_nick.len()) else {
            return false;
        };
        head.eq_ignore_ascii_case(&self.bot_nick)
            && matches!(text[self.bot_nick.len()..].chars().next(), Some(':' | ','))
    }
}

#[async_trait]
impl MessageHandler for MentionHandler {
    fn only_talk_channels(&self) -> bool {
        true
    }

    async fn on_message(&self, event: MessageEvent) -> Result<bool> {
        if !self.is_addressed(&event.message.text) {
            return Ok(false);
        }
        event
            .respond(&format!("Hi! Try {}help.", self.prefix))
            .await?;
        Ok(true)
    }
}
