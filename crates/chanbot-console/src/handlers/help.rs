use std::{collections::BTreeMap, sync::Arc};

use async_trait::async_trait;

use chanbot_core::{
    dispatch::CommandHandler,
    domain::{Command, CommandEvent},
    Result,
};

/// `help` lists every command; `help <token>` shows one command's usage.
pub struct HelpHandler {
    prefix: char,
    table: BTreeMap<String, Command>,
}

impl HelpHandler {
    /// Snapshot the commands of `others` (plus `help` itself) at construction.
    pub fn new(prefix: char, others: &[Arc<dyn CommandHandler>]) -> Self {
        let mut table = BTreeMap::new();
        let own = Self::command();
        table.insert(own.token.clone(), own);
        for handler in others {
            for command in handler.commands() {
                table.insert(command.token.clone(), command);
            }
        }
        Self { prefix, table }
    }

    fn command() -> Command {
        Command::new("help", "help [command]")
    }

    fn usage_line(&self, command: &Command) -> String {
        let admin = if command.privileged { " (admin)" } else { "" };
        format!("Usage: {}{}{admin}", self.prefix, command.usage)
    }
}

#[async_trait]
impl CommandHandler for HelpHandler {
    fn commands(&self) -> Vec<Command> {
        vec![Self::command()]
    }

    async fn on_command(&self, event: CommandEvent) -> Result<bool> {
        let reply = match event.args().map(str::trim) {
            Some(topic) => {
                let token = topic.trim_start_matches(self.prefix);
                match self.table.get(token) {
                    Some(command) => self.usage_line(command),
                    None => format!("No such command: {token}"),
                }
            }
            None => {
                let tokens = self
                    .table
                    .keys()
                    .map(|t| format!("{}{t}", self.prefix))
                    .collect::<Vec<_>>()
                    .join(", ");
                format!("Commands: {tokens}")
            }
        };
        event.respond(&reply).await?;
        Ok(true)
    }
}
