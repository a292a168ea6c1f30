use std::sync::Arc;

use tokio::{
    io::{AsyncBufRead, AsyncBufReadExt, BufReader},
    task::{JoinError, JoinSet},
};
use tokio_util::sync::CancellationToken;

use chanbot_core::{
    audit::AuditLogger,
    auth::PrivilegedExecutionGate,
    clock::{Clock, SystemClock},
    config::Config,
    dispatch::{CommandHandler, Dispatcher},
    ports::ChatPort,
    rate_limit::RateLimiter,
};

use crate::handlers::{AdminHandler, ChannelLog, HelpHandler, MentionHandler};
use crate::line::{parse_line, InboundEvent};
use crate::ConsolePort;

/// Wire the dispatcher with the built-in handlers.
pub fn build_dispatcher(
    cfg: &Config,
    clock: Arc<dyn Clock>,
    port: Arc<dyn ChatPort>,
    shutdown: CancellationToken,
) -> Dispatcher {
    let audit = cfg
        .audit_log_path
        .as_ref()
        .map(|path| Arc::new(AuditLogger::new(path.clone(), cfg.audit_log_json)));

    let rate_limiter = Arc::new(RateLimiter::new(cfg.rate_limit(), clock.clone()));
    let mut gate = PrivilegedExecutionGate::new(cfg.gate(), clock);
    if let Some(audit) = &audit {
        gate = gate.with_audit(audit.clone());
    }
    let gate = Arc::new(gate);

    let admin: Arc<dyn CommandHandler> = Arc::new(AdminHandler::new(gate.clone(), shutdown));
    let help: Arc<dyn CommandHandler> =
        Arc::new(HelpHandler::new(cfg.command_prefix, &[admin.clone()]));

    Dispatcher::builder(cfg.dispatcher(), port, rate_limiter, gate)
        .command_handler(help)
        .command_handler(admin)
        .message_handler(Arc::new(ChannelLog))
        .message_handler(Arc::new(MentionHandler::new(
            cfg.bot_nick.clone(),
            cfg.command_prefix,
        )))
        .audit(audit)
        .build()
}

/// Read stdin until EOF or until `quit` fires.
pub async fn run(cfg: Arc<Config>) -> anyhow::Result<()> {
    let shutdown = CancellationToken::new();
    let port: Arc<dyn ChatPort> = Arc::new(ConsolePort::stdout());
    let dispatcher = Arc::new(build_dispatcher(
        &cfg,
        Arc::new(SystemClock),
        port,
        shutdown.clone(),
    ));

    if cfg.talk_channels.is_empty() {
        tracing::warn!("TALK_CHANNELS is empty; commands will be ignored everywhere");
    }
    if cfg.bypass_auth {
        tracing::warn!("BYPASS_AUTH is set; privileged commands run without identity checks");
    }
    tracing::info!(
        nick = %cfg.bot_nick,
        channels = ?cfg.talk_channels,
        admins = cfg.admin_nicks.len(),
        commands = dispatcher.commands().len(),
        "chanbot console started"
    );

    let sweeper = dispatcher
        .rate_limiter()
        .spawn_sweeper(shutdown.child_token());

    let served = serve(
        BufReader::new(tokio::io::stdin()),
        dispatcher,
        shutdown.clone(),
    )
    .await;

    shutdown.cancel();
    if let Err(e) = sweeper.await {
        tracing::warn!("rate limiter sweeper ended abnormally: {e}");
    }
    served?;

    tracing::info!("chanbot console stopped");
    Ok(())
}

/// Deliver every line of `input`, each on its own task, until EOF or `shutdown`.
///
/// Lines that are not valid UTF-8 are decoded lossily rather than ending the loop.
/// Events still in flight when the loop ends are awaited before returning.
pub async fn serve<R>(
    mut input: R,
    dispatcher: Arc<Dispatcher>,
    shutdown: CancellationToken,
) -> std::io::Result<()>
where
    R: AsyncBufRead + Unpin,
{
    let mut inflight = JoinSet::new();
    let mut buf = Vec::new();

    loop {
        buf.clear();
        tokio::select! {
            _ = shutdown.cancelled() => break,
            read = input.read_until(b'\n', &mut buf) => {
                if read? == 0 {
                    break;
                }
                let line = String::from_utf8_lossy(&buf);
                deliver(&mut inflight, &dispatcher, &line);
            }
        }

        while let Some(joined) = inflight.try_join_next() {
            reap(joined);
        }
    }

    while let Some(joined) = inflight.join_next().await {
        reap(joined);
    }
    Ok(())
}

fn deliver(inflight: &mut JoinSet<()>, dispatcher: &Arc<Dispatcher>, line: &str) {
    let Some(event) = parse_line(line) else {
        if !line.trim().is_empty() {
            tracing::debug!(line = %line.trim_end(), "unrecognised input line");
        }
        return;
    };

    let dispatcher = Arc::clone(dispatcher);
    inflight.spawn(async move {
        match event {
            InboundEvent::Message(message) => {
                let report = dispatcher.handle(message).await;
                tracing::trace!(?report, "message dispatched");
            }
            InboundEvent::Notice(notice) => {
                let outcome = dispatcher.handle_notice(notice).await;
                tracing::trace!(?outcome, "notice handled");
            }
        }
    });
}

fn reap(joined: Result<(), JoinError>) {
    if let Err(e) = joined {
        tracing::warn!("event delivery task failed: {e}");
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use tokio::io::AsyncWriteExt;

    use chanbot_core::{
        audit::PrivilegedDecision,
        auth::NoticeOutcome,
        clock::ManualClock,
        dispatch::CommandOutcome,
        domain::{InboundMessage, Notice},
    };

    use super::*;
    use crate::handlers::test_support::FakePort;

    fn config(pairs: &[(&str, &str)]) -> Config {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|k| vars.get(k).cloned()).unwrap()
    }

    #[tokio::test]
    async fn quit_flow_through_authority() {
        let cfg = config(&[("TALK_CHANNELS", "#rust"), ("ADMIN_NICKS", "alice")]);
        let port = Arc::new(FakePort::default());
        let shutdown = CancellationToken::new();
        let d = build_dispatcher(
            &cfg,
            Arc::new(ManualClock::new(0)),
            port.clone(),
            shutdown.clone(),
        );

        let report = d
            .handle(InboundMessage::new("#rust", "alice", "!quit"))
            .await;
        assert_eq!(
            report.command,
            CommandOutcome::Privileged(PrivilegedDecision::Queried)
        );
        assert!(!shutdown.is_cancelled());

        let outcome = d
            .handle_notice(Notice::new("NickServ", "alice ACC 3"))
            .await;
        assert_eq!(outcome, NoticeOutcome::Granted);
        assert!(shutdown.is_cancelled());
        assert_eq!(
            port.sent(),
            vec![
                ("NickServ".to_string(), "ACC alice".to_string()),
                ("#rust".to_string(), "alice: Bye.".to_string()),
            ]
        );
    }

    #[tokio::test]
    async fn bypass_mode_runs_say_directly() {
        let cfg = config(&[("TALK_CHANNELS", "#rust"), ("BYPASS_AUTH", "true")]);
        let port = Arc::new(FakePort::default());
        let d = build_dispatcher(
            &cfg,
            Arc::new(ManualClock::new(0)),
            port.clone(),
            CancellationToken::new(),
        );

        d.handle(InboundMessage::new("#rust", "mallory", "!say #ops hi"))
            .await;
        assert_eq!(port.sent(), vec![("#ops".to_string(), "hi".to_string())]);
    }

    #[tokio::test]
    async fn help_and_mentions_share_the_channel() {
        let cfg = config(&[("TALK_CHANNELS", "#rust")]);
        let port = Arc::new(FakePort::default());
        let d = build_dispatcher(
            &cfg,
            Arc::new(ManualClock::new(0)),
            port.clone(),
            CancellationToken::new(),
        );

        d.handle(InboundMessage::new("#rust", "bob", "!help")).await;
        let report = d
            .handle(InboundMessage::new("#rust", "bob", "chanbot: hello?"))
            .await;
        assert!(report.claimed_by.is_some());

        let texts: Vec<String> = port.sent().into_iter().map(|(_, t)| t).collect();
        assert_eq!(
            texts,
            vec![
                "bob: Commands: !help, !logout, !quit, !say",
                "bob: Hi! Try !help.",
            ]
        );
    }

    #[tokio::test]
    async fn undecodable_line_does_not_stop_the_loop() {
        let cfg = config(&[("TALK_CHANNELS", "#rust")]);
        let port = Arc::new(FakePort::default());
        let d = Arc::new(build_dispatcher(
            &cfg,
            Arc::new(ManualClock::new(0)),
            port.clone(),
            CancellationToken::new(),
        ));

        let input: &[u8] = b":bob PRIVMSG #rust :caf\xe9\n:bob PRIVMSG #rust :!help logout\n";
        serve(BufReader::new(input), d, CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(
            port.sent(),
            vec![("#rust".to_string(), "bob: Usage: !logout".to_string())]
        );
    }

    #[tokio::test]
    async fn serve_stops_on_quit_and_drains_in_flight_events() {
        let cfg = config(&[("TALK_CHANNELS", "#rust"), ("BYPASS_AUTH", "true")]);
        let port = Arc::new(FakePort::default());
        let shutdown = CancellationToken::new();
        let d = Arc::new(build_dispatcher(
            &cfg,
            Arc::new(ManualClock::new(0)),
            port.clone(),
            shutdown.clone(),
        ));

        // The writer half stays open, so only `quit` can end the loop.
        let (mut writer, reader) = tokio::io::duplex(1024);
        writer
            .write_all(b":alice PRIVMSG #rust :!quit\n")
            .await
            .unwrap();
        serve(BufReader::new(reader), d, shutdown.clone())
            .await
            .unwrap();

        assert!(shutdown.is_cancelled());
        assert_eq!(
            port.sent(),
            vec![("#rust".to_string(), "alice: Bye.".to_string())]
        );
    }
}
