use crate::channels::irc::{self, InboundEvent, IrcSession, SessionError, SessionState};
use crate::config::Config;
use crate::dispatch::{CommandDispatcher, DispatchOutcome};
use crate::prompt::PromptTemplates;
use crate::providers;
use crate::security::{RateGate, RateLimits};
use anyhow::Result;
use std::future::Future;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::time::Duration;

const QUIT_MESSAGE: &str = "Shutting down";

/// Run the bot until Ctrl-C.
///
/// Connection failures and dropped sessions are logged and retried after a
/// fixed delay, forever. The rate gate lives outside the session so quotas
/// survive reconnects.
pub async fn run(config: Config) -> Result<()> {
    let provider = providers::create_provider(&config)?;
    let gate = RateGate::new(RateLimits::from(&config.limits));
    let mut dispatcher = CommandDispatcher::new(
        provider,
        gate,
        PromptTemplates::from(&config.prompts),
        &config.irc.nickname,
        config.irc.max_line_len,
    );
    let reconnect_delay = Duration::from_secs(config.irc.reconnect_delay_secs);

    let shutdown = shutdown_signal();
    tokio::pin!(shutdown);

    loop {
        let connected = tokio::select! {
            () = &mut shutdown => break,
            res = irc::connect(&config.irc) => res,
        };

        match connected {
            Ok(mut session) => {
                dispatcher.set_nickname(session.nickname());
                match serve(&mut session, &mut dispatcher, &mut shutdown).await {
                    Ok(()) => break,
                    Err(e) => tracing::error!("IRC session ended: {e}"),
                }
            }
            Err(e) => tracing::error!("IRC connection failed: {e}"),
        }

        dispatcher.rate_gate().cleanup();
        tracing::info!("Reconnecting in {}s", reconnect_delay.as_secs());
        tokio::select! {
            () = &mut shutdown => break,
            () = tokio::time::sleep(reconnect_delay) => {}
        }
    }

    tracing::info!("Shutting down");
    Ok(())
}

/// Drive one registered session: read a batch, dispatch its chat in arrival
/// order, repeat.
///
/// Returns `Ok(())` after `shutdown` resolves and `QUIT` was sent, or the
/// error that ended the session.
pub async fn serve<S, F>(
    session: &mut IrcSession<S>,
    dispatcher: &mut CommandDispatcher,
    shutdown: &mut F,
) -> Result<(), SessionError>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
    F: Future<Output = ()> + Unpin,
{
    loop {
        let events = tokio::select! {
            () = &mut *shutdown => {
                session.quit(QUIT_MESSAGE).await?;
                return Ok(());
            }
            events = session.next_events() => events?,
        };

        for event in events {
            let InboundEvent::ChatMessage(chat) = event else {
                continue;
            };
            let outcome = dispatcher.dispatch(&chat, session).await;
            if outcome != DispatchOutcome::Ignored {
                tracing::info!("{} in {}: {outcome:?}", chat.sender, chat.destination);
            }
            // A write error already moved the session to Disconnected.
            if session.state() != SessionState::Ready {
                return Err(session
                    .take_send_failure()
                    .unwrap_or(SessionError::NotConnected));
            }
        }
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for Ctrl-C: {e}");
        std::future::pending::<()>().await;
    }
}
