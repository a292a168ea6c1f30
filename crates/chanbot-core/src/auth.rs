//! Privileged command gate.
//!
//! Admin-only actions run immediately for identities with a fresh authentication.
//! Otherwise the action is parked in a correlation table keyed by identity and an
//! `ACC <nick>` query goes to the authority; the authority's notice resumes (or
//! refuses) it later, on whichever task delivers that notice.
//!
//! The protocol carries no correlation id, so the identity is the only key: a second
//! request from the same identity replaces the first one without telling its invoker,
//! and a request the authority never answers stays parked.

use std::{collections::HashSet, future::Future, pin::Pin, sync::Arc, time::Duration};

use dashmap::DashMap;

use crate::{
    audit::{AuditEvent, AuditLogger, PrivilegedDecision},
    clock::Clock,
    domain::{MessageEvent, Notice},
    errors::Error,
    Result,
};

pub const ACC_MARKER: &str = "ACC";
pub const NOT_AUTHORIZED: &str = "You are not authorized to do that.";

pub type ActionFuture = Pin<Box<dyn Future<Output = Result<()>> + Send>>;

/// A deferred admin-only action. Runs at most once.
pub type PrivilegedAction = Box<dyn FnOnce() -> ActionFuture + Send + Sync>;

/// Box an async closure as a [`PrivilegedAction`].
pub fn action<F, Fut>(f: F) -> PrivilegedAction
where
    F: FnOnce() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<()>> + Send + 'static,
{
    Box::new(move || Box::pin(f()))
}

#[derive(Clone, Debug)]
pub struct GateConfig {
    /// Skip the authority entirely (tests, local runs).
    pub bypass: bool,
    pub admins: HashSet<String>,
    pub authority: String,
    /// Level token in an `ACC` reply that means "logged in".
    pub logged_in_level: String,
    pub ttl: Duration,
}

impl Default for GateConfig {
    fn default() -> Self {
        Self {
            bypass: false,
            admins: HashSet::new(),
            authority: "NickServ".to_string(),
            logged_in_level: "3".to_string(),
            ttl: Duration::from_secs(600),
        }
    }
}

/// What an authority notice did to the gate.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum NoticeOutcome {
    /// Not from the authority, malformed, or unsolicited.
    Ignored,
    /// The identity was authenticated and its parked action ran.
    Granted,
    /// The parked action was refused and its invoker told so.
    Denied,
}

struct PendingPrivilegedRequest {
    event: MessageEvent,
    action: PrivilegedAction,
}

pub struct PrivilegedExecutionGate {
    cfg: GateConfig,
    clock: Arc<dyn Clock>,
    authenticated_until: DashMap<String, u64>,
    pending: DashMap<String, PendingPrivilegedRequest>,
    audit: Option<Arc<AuditLogger>>,
}

impl PrivilegedExecutionGate {
    pub fn new(cfg: GateConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            cfg,
            clock,
            authenticated_until: DashMap::new(),
            pending: DashMap::new(),
            audit: None,
        }
    }

    pub fn with_audit(mut self, audit: Arc<AuditLogger>) -> Self {
        self.audit = Some(audit);
        self
    }

    pub fn config(&self) -> &GateConfig {
        &self.cfg
    }

    pub fn is_admin(&self, nick: &str) -> bool {
        self.cfg.admins.contains(nick)
    }

    pub fn is_authenticated(&self, nick: &str) -> bool {
        let now = self.clock.now_millis();
        self.authenticated_until
            .get(nick)
            .is_some_and(|until| now < *until)
    }

    /// Drop a cached authentication. Returns whether one was active.
    pub fn revoke(&self, nick: &str) -> bool {
        let now = self.clock.now_millis();
        self.authenticated_until
            .remove(nick)
            .is_some_and(|(_, until)| now < until)
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    /// Run `action` for the sender of `event` once the sender is known to be an
    /// authenticated admin.
    ///
    /// Never waits on the authority: with no fresh authentication the action is parked
    /// and `Queried` is returned straight away.
    pub async fn run_privileged(
        &self,
        event: MessageEvent,
        action: PrivilegedAction,
    ) -> Result<PrivilegedDecision> {
        let nick = event.sender().to_string();

        if self.cfg.bypass || self.is_authenticated(&nick) {
            self.audit_decision(&event, PrivilegedDecision::Executed);
            run_action(action).await?;
            return Ok(PrivilegedDecision::Executed);
        }

        if !self.is_admin(&nick) {
            tracing::info!(nick = %nick, channel = %event.channel(), "privileged command refused");
            self.audit_decision(&event, PrivilegedDecision::Refused);
            event.respond(NOT_AUTHORIZED).await?;
            return Ok(PrivilegedDecision::Refused);
        }

        self.audit_decision(&event, PrivilegedDecision::Queried);
        let port = Arc::clone(event.port());
        let superseded = self
            .pending
            .insert(nick.clone(), PendingPrivilegedRequest { event, action });
        if superseded.is_some() {
            tracing::debug!(nick = %nick, "replaced unresolved privileged request");
        }

        let query = format!("{ACC_MARKER} {nick}");
        port.send_message(&self.cfg.authority, &query).await?;
        tracing::debug!(nick = %nick, authority = %self.cfg.authority, "identity check sent");
        Ok(PrivilegedDecision::Queried)
    }

    /// Resolve a parked request from an authority notice of the form
    /// `<nick> ACC <level>`.
    pub async fn on_authority_notice(&self, notice: &Notice) -> NoticeOutcome {
        if !notice.sender.eq_ignore_ascii_case(&self.cfg.authority) {
            return NoticeOutcome::Ignored;
        }
        let Some((nick, level)) = parse_acc_reply(&notice.text) else {
            tracing::debug!(text = %notice.text, "ignoring unparseable authority notice");
            return NoticeOutcome::Ignored;
        };

        let Some((_, pending)) = self.pending.remove(nick) else {
            tracing::debug!(nick, "no pending privileged request; notice ignored");
            return NoticeOutcome::Ignored;
        };

        let granted = level == self.cfg.logged_in_level && self.is_admin(nick);
        if let Some(audit) = &self.audit {
            audit.record(AuditEvent::auth(nick, level, granted));
        }

        if !granted {
            tracing::info!(nick, level, "identity check failed");
            if let Err(e) = pending.event.respond(NOT_AUTHORIZED).await {
                tracing::warn!(nick, "failed to deliver refusal: {e}");
            }
            return NoticeOutcome::Denied;
        }

        let until = self
            .clock
            .now_millis()
            .saturating_add(self.cfg.ttl.as_millis() as u64);
        self.authenticated_until.insert(nick.to_string(), until);
        tracing::info!(nick, "identity confirmed");

        if let Err(e) = run_action(pending.action).await {
            tracing::warn!(nick, "privileged action failed: {e}");
            if let Some(audit) = &self.audit {
                audit.record(AuditEvent::error(
                    nick,
                    pending.event.channel(),
                    &e.to_string(),
                ));
            }
        }
        NoticeOutcome::Granted
    }

    fn audit_decision(&self, event: &MessageEvent, decision: PrivilegedDecision) {
        if let Some(audit) = &self.audit {
            audit.record(AuditEvent::privileged(
                event.sender(),
                event.channel(),
                event.message.text.trim(),
                decision,
            ));
        }
    }
}

/// Split an authority reply into `(nick, level)`.
///
/// Exactly three whitespace-separated tokens with the `ACC` marker in the middle.
pub fn parse_acc_reply(text: &str) -> Option<(&str, &str)> {
    let mut parts = text.split_whitespace();
    let (nick, marker, level) = (parts.next()?, parts.next()?, parts.next()?);
    if parts.next().is_some() || marker != ACC_MARKER {
        return None;
    }
    Some((nick, level))
}

/// Run an action on its own task so a panic inside it stays contained.
async fn run_action(action: PrivilegedAction) -> Result<()> {
    match tokio::spawn(action()).await {
        Ok(res) => res,
        Err(e) if e.is_panic() => Err(Error::Handler("privileged action panicked".to_string())),
        Err(e) => Err(Error::Handler(format!("privileged action aborted: {e}"))),
    }
}
