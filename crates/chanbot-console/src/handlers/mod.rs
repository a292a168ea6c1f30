//! Built-in handlers shipped with the console bot.
//!
//! - `help`: command list and per-command usage
//! - `say` / `quit` (privileged) and `logout`: bot administration
//! - channel logger and mention responder: passive message handlers

mod admin;
mod chatter;
mod help;

pub use admin::AdminHandler;
pub use chatter::{ChannelLog, MentionHandler};
pub use help::HelpHandler;

#[cfg(test)]
pub(crate) mod test_support {
    use std::sync::Arc;

    use async_trait::async_trait;
    use parking_lot::Mutex;

    use chanbot_core::{
        domain::{Command, CommandEvent, InboundMessage, MessageEvent},
        ports::ChatPort,
        Result,
    };

    #[derive(Default)]
    pub struct FakePort {
        sent: Mutex<Vec<(String, String)>>,
    }

    impl FakePort {
        pub fn sent(&self) -> Vec<(String, String)> {
            self.sent.lock().clone()
        }
    }

    #[async_trait]
    impl ChatPort for FakePort {
        async fn send_message(&self, target: &str, text: &str) -> Result<()> {
            self.sent.lock().push((target.to_string(), text.to_string()));
            Ok(())
        }
    }

    pub fn command_event(
        port: &Arc<FakePort>,
        sender: &str,
        command: Command,
        args: Option<&str>,
    ) -> CommandEvent {
        let text = match args {
            Some(a) => format!("!{} {a}", command.token),
            None => format!("!{}", command.token),
        };
        CommandEvent {
            event: MessageEvent::new(InboundMessage::new("#rust", sender, text), port.clone()),
            command,
            args: args.map(str::to_string),
        }
    }
}
