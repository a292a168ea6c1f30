//! Inbound message routing.
//!
//! Command-shaped text in a talk channel is rate limited, resolved against the command
//! table and handed to its owner (through the privileged gate when the command asks for
//! it). Every message, command or not, is then offered to the passive message handlers
//! in registration order until one claims it.

use std::{
    collections::{HashMap, HashSet},
    future::Future,
    sync::Arc,
};

use async_trait::async_trait;

use crate::{
    audit::{AuditEvent, AuditLogger, PrivilegedDecision},
    auth::{self, NoticeOutcome, PrivilegedExecutionGate},
    domain::{Command, CommandEvent, InboundMessage, MessageEvent, Notice},
    errors::Error,
    ports::ChatPort,
    rate_limit::RateLimiter,
    Result,
};

pub const THROTTLED: &str = "Slow down! You're sending commands too fast.";

/// Owner of one or more commands.
#[async_trait]
pub trait CommandHandler: Send + Sync {
    /// The commands this handler answers to. Read once, at registration.
    fn commands(&self) -> Vec<Command>;

    async fn on_command(&self, event: CommandEvent) -> Result<bool>;

    fn name(&self) -> &str {
        std::any::type_name::<Self>()
    }
}

/// Passive observer of channel text. Returning `true` stops the fan-out.
#[async_trait]
pub trait MessageHandler: Send + Sync {
    fn only_talk_channels(&self) -> bool;

    async fn on_message(&self, event: MessageEvent) -> Result<bool>;

    fn name(&self) -> &str {
        std::any::type_name::<Self>()
    }
}

#[derive(Clone, Debug)]
pub struct DispatcherConfig {
    pub bot_nick: String,
    pub prefix: char,
    talk_channels: HashSet<String>,
}

impl DispatcherConfig {
    pub fn new(
        bot_nick: impl Into<String>,
        prefix: char,
        talk_channels: impl IntoIterator<Item = String>,
    ) -> Self {
        Self {
            bot_nick: bot_nick.into(),
            prefix,
            talk_channels: talk_channels
                .into_iter()
                .map(|c| c.to_ascii_lowercase())
                .collect(),
        }
    }

    pub fn is_talk_channel(&self, channel: &str) -> bool {
        self.talk_channels.contains(&channel.to_ascii_lowercase())
    }

    pub fn is_self(&self, nick: &str) -> bool {
        nick.eq_ignore_ascii_case(&self.bot_nick)
    }
}

/// What happened to the command part of a message.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CommandOutcome {
    /// Sent by the bot itself; nothing ran at all.
    FromSelf,
    /// No prefix, or not in a talk channel.
    NotCommand,
    Throttled,
    Unknown,
    /// A plain command ran; carries the handler's own verdict.
    Handled(bool),
    /// A privileged command went through the gate.
    Privileged(PrivilegedDecision),
    /// The handler (or the gate) failed; already logged.
    Failed,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DispatchReport {
    pub command: CommandOutcome,
    /// Name of the message handler that claimed the message, if any.
    pub claimed_by: Option<String>,
}

#[derive(Clone)]
struct Route {
    command: Command,
    handler: Arc<dyn CommandHandler>,
}

pub struct Dispatcher {
    cfg: DispatcherConfig,
    port: Arc<dyn ChatPort>,
    rate_limiter: Arc<RateLimiter>,
    gate: Arc<PrivilegedExecutionGate>,
    routes: HashMap<String, Route>,
    message_handlers: Vec<Arc<dyn MessageHandler>>,
    audit: Option<Arc<AuditLogger>>,
}

pub struct DispatcherBuilder {
    cfg: DispatcherConfig,
    port: Arc<dyn ChatPort>,
    rate_limiter: Arc<RateLimiter>,
    gate: Arc<PrivilegedExecutionGate>,
    command_handlers: Vec<Arc<dyn CommandHandler>>,
    message_handlers: Vec<Arc<dyn MessageHandler>>,
    audit: Option<Arc<AuditLogger>>,
}

impl DispatcherBuilder {
    pub fn command_handler(mut self, handler: Arc<dyn CommandHandler>) -> Self {
        self.command_handlers.push(handler);
        self
    }

    /// Message handlers are consulted in the order they are added.
    pub fn message_handler(mut self, handler: Arc<dyn MessageHandler>) -> Self {
        self.message_handlers.push(handler);
        self
    }

    pub fn audit(mut self, audit: Option<Arc<AuditLogger>>) -> Self {
        self.audit = audit;
        self
    }

    pub fn build(self) -> Dispatcher {
        let mut routes: HashMap<String, Route> = HashMap::new();
        for handler in &self.command_handlers {
            for command in handler.commands() {
                let token = command.token.clone();
                let route = Route {
                    command,
                    handler: Arc::clone(handler),
                };
                if let Some(previous) = routes.insert(token.clone(), route) {
                    tracing::warn!(
                        token = %token,
                        previous = previous.handler.name(),
                        current = handler.name(),
                        "duplicate command token; last registration wins"
                    );
                }
            }
        }

        Dispatcher {
            cfg: self.cfg,
            port: self.port,
            rate_limiter: self.rate_limiter,
            gate: self.gate,
            routes,
            message_handlers: self.message_handlers,
            audit: self.audit,
        }
    }
}

impl Dispatcher {
    pub fn builder(
        cfg: DispatcherConfig,
        port: Arc<dyn ChatPort>,
        rate_limiter: Arc<RateLimiter>,
        gate: Arc<PrivilegedExecutionGate>,
    ) -> DispatcherBuilder {
        DispatcherBuilder {
            cfg,
            port,
            rate_limiter,
            gate,
            command_handlers: Vec::new(),
            message_handlers: Vec::new(),
            audit: None,
        }
    }

    pub fn config(&self) -> &DispatcherConfig {
        &self.cfg
    }

    pub fn gate(&self) -> &Arc<PrivilegedExecutionGate> {
        &self.gate
    }

    pub fn rate_limiter(&self) -> &Arc<RateLimiter> {
        &self.rate_limiter
    }

    /// The active command table, sorted by token.
    pub fn commands(&self) -> Vec<Command> {
        let mut out: Vec<Command> = self.routes.values().map(|r| r.command.clone()).collect();
        out.sort_by(|a, b| a.token.cmp(&b.token));
        out
    }

    pub async fn handle(&self, message: InboundMessage) -> DispatchReport {
        if self.cfg.is_self(&message.sender) {
            return DispatchReport {
                command: CommandOutcome::FromSelf,
                claimed_by: None,
            };
        }

        let talk_channel = self.cfg.is_talk_channel(&message.channel);
        let event = MessageEvent::new(message, Arc::clone(&self.port));

        let command = match parse_command(&event.message.text, self.cfg.prefix) {
            Some((token, args)) if talk_channel => {
                self.dispatch_command(&event, token, args).await
            }
            _ => CommandOutcome::NotCommand,
        };

        let claimed_by = self.offer_to_message_handlers(&event, talk_channel).await;
        DispatchReport {
            command,
            claimed_by,
        }
    }

    /// Hand a notice to the gate; only the authority's notices do anything.
    pub async fn handle_notice(&self, notice: Notice) -> NoticeOutcome {
        self.gate.on_authority_notice(&notice).await
    }

    async fn dispatch_command(
        &self,
        event: &MessageEvent,
        token: &str,
        args: Option<&str>,
    ) -> CommandOutcome {
        let nick = event.sender();
        if self.rate_limiter.limit(nick) {
            tracing::info!(nick, channel = event.channel(), token, "command throttled");
            if let Some(audit) = &self.audit {
                audit.record(AuditEvent::rate_limit(nick, event.channel(), token));
            }
            if let Err(e) = event.respond(THROTTLED).await {
                tracing::warn!(nick, "failed to send throttle warning: {e}");
            }
            return CommandOutcome::Throttled;
        }

        let Some(route) = self.routes.get(token).cloned() else {
            tracing::debug!(nick, token, "unknown command");
            return CommandOutcome::Unknown;
        };

        let command_event = CommandEvent {
            event: event.clone(),
            command: route.command.clone(),
            args: args.map(str::to_string),
        };

        if route.command.privileged {
            let handler = Arc::clone(&route.handler);
            let action = auth::action(move || async move {
                handler.on_command(command_event).await.map(|_| ())
            });
            return match self.gate.run_privileged(event.clone(), action).await {
                Ok(decision) => CommandOutcome::Privileged(decision),
                Err(e) => {
                    self.report_failure(event, route.handler.name(), &e);
                    CommandOutcome::Failed
                }
            };
        }

        let handler = Arc::clone(&route.handler);
        match contained(async move { handler.on_command(command_event).await }).await {
            Ok(handled) => CommandOutcome::Handled(handled),
            Err(e) => {
                self.report_failure(event, route.handler.name(), &e);
                CommandOutcome::Failed
            }
        }
    }

    async fn offer_to_message_handlers(
        &self,
        event: &MessageEvent,
        talk_channel: bool,
    ) -> Option<String> {
        for handler in &self.message_handlers {
            if handler.only_talk_channels() && !talk_channel {
                continue;
            }

            let h = Arc::clone(handler);
            let ev = event.clone();
            match contained(async move { h.on_message(ev).await }).await {
                Ok(true) => return Some(handler.name().to_string()),
                Ok(false) => {}
                Err(e) => self.report_failure(event, handler.name(), &e),
            }
        }
        None
    }

    fn report_failure(&self, event: &MessageEvent, handler: &str, err: &Error) {
        tracing::warn!(
            handler,
            nick = event.sender(),
            channel = event.channel(),
            "handler failed: {err}"
        );
        if let Some(audit) = &self.audit {
            audit.record(AuditEvent::error(
                event.sender(),
                event.channel(),
                &format!("{handler}: {err}"),
            ));
        }
    }
}

/// Split `!token rest of line` into `("token", Some("rest of line"))`.
///
/// Returns `None` when the trimmed text does not start with `prefix`.
pub fn parse_command(text: &str, prefix: char) -> Option<(&str, Option<&str>)> {
    let rest = text.trim().strip_prefix(prefix)?;
    match rest.split_once(char::is_whitespace) {
        Some((token, args)) => {
            let args = args.trim_start();
            Some((token, (!args.is_empty()).then_some(args)))
        }
        None => Some((rest, None)),
    }
}

/// Run handler code on its own task so a panic stays on that task.
async fn contained<T, F>(fut: F) -> Result<T>
where
    T: Send + 'static,
    F: Future<Output = Result<T>> + Send + 'static,
{
    match tokio::spawn(fut).await {
        Ok(res) => res,
        Err(e) if e.is_panic() => Err(Error::Handler("handler panicked".to_string())),
        Err(e) => Err(Error::Handler(format!("handler aborted: {e}"))),
    }
}
