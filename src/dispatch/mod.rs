//! Chat command handling.
//!
//! [`CommandDispatcher`] turns one [`ChatMessage`] into at most one
//! completion call and a sequence of replies. It owns the [`RateGate`], so
//! admission and recording happen under the same `&mut self` borrow and
//! can never interleave with another command.

use crate::channels::irc::ChatMessage;
use crate::channels::outbound::{FormatMode, OutboundFormatter};
use crate::channels::traits::{Channel, SendMessage};
use crate::prompt::{PromptMode, PromptTemplates};
use crate::providers::Provider;
use crate::security::RateGate;

pub const HELP_TEXT: &str = "Commands: !ask <question> - Ask a general question | !code <question> - Get programming help | !help - Show this help message";

pub const RATE_LIMIT_NOTICE: &str = "Rate limit exceeded. Please try again later.";

/// Sent unformatted when a reply could not be delivered in full.
pub const DELIVERY_FAILED_NOTICE: &str = "Error: Message delivery failed.";

/// A recognized chat command. Matching is case-sensitive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command<'a> {
    Ask(&'a str),
    Code(&'a str),
    Help,
}

impl<'a> Command<'a> {
    /// `None` for ordinary chatter and for commands with nothing to ask.
    pub fn parse(text: &'a str) -> Option<Self> {
        if text == "!help" {
            return Some(Self::Help);
        }
        let (query, build): (&str, fn(&'a str) -> Self) =
            if let Some(rest) = text.strip_prefix("!ask ") {
                (rest, Self::Ask)
            } else if let Some(rest) = text.strip_prefix("!code ") {
                (rest, Self::Code)
            } else {
                return None;
            };
        let query = query.trim();
        (!query.is_empty()).then(|| build(query))
    }
}

/// What happened to one inbound chat message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// Not a command; nothing was sent.
    Ignored,
    Help,
    RateLimited,
    QuotaExceeded,
    Replied { chunks: usize },
    CompletionFailed,
    /// The reply broke off partway; a delivery-failure notice was attempted.
    SendFailed,
}

pub struct CommandDispatcher {
    provider: Box<dyn Provider>,
    gate: RateGate,
    templates: PromptTemplates,
    formatter: OutboundFormatter,
    max_line_len: usize,
}

impl CommandDispatcher {
    pub fn new(
        provider: Box<dyn Provider>,
        gate: RateGate,
        templates: PromptTemplates,
        nickname: &str,
        max_line_len: usize,
    ) -> Self {
        Self {
            provider,
            gate,
            templates,
            formatter: OutboundFormatter::new(nickname, max_line_len),
            max_line_len,
        }
    }

    /// Re-target reply prefixes after the server accepted a different nickname.
    pub fn set_nickname(&mut self, nickname: &str) {
        self.formatter = OutboundFormatter::new(nickname, self.max_line_len);
    }

    pub fn rate_gate(&mut self) -> &mut RateGate {
        &mut self.gate
    }

    pub async fn dispatch(
        &mut self,
        message: &ChatMessage,
        channel: &mut dyn Channel,
    ) -> DispatchOutcome {
        let Some(command) = Command::parse(&message.text) else {
            return DispatchOutcome::Ignored;
        };
        let target = message.destination.as_str();

        let (mode, query) = match command {
            Command::Help => {
                tracing::info!("Help requested by {} in {target}", message.sender);
                return if self.send_prose(channel, target, HELP_TEXT).await {
                    DispatchOutcome::Help
                } else {
                    DispatchOutcome::SendFailed
                };
            }
            Command::Ask(query) => (PromptMode::Ask, query),
            Command::Code(query) => (PromptMode::Code, query),
        };

        if !self.gate.admit_global() {
            tracing::warn!("Global rate limit reached, refusing {}", message.sender);
            self.send_prose(channel, target, RATE_LIMIT_NOTICE).await;
            return DispatchOutcome::RateLimited;
        }

        if !self.gate.admit_identity(&message.sender) {
            tracing::info!("{} has used their daily quota", message.sender);
            let notice = format!("{}: You have reached your daily query limit.", message.sender);
            self.send_prose(channel, target, &notice).await;
            return DispatchOutcome::QuotaExceeded;
        }

        tracing::info!("{mode:?} from {} in {target}", message.sender);
        let prompt = self.templates.render(mode, query);

        let text = match self.provider.complete(&prompt).await {
            Ok(text) => text,
            Err(e) => {
                tracing::error!("{} completion failed: {e}", self.provider.name());
                let notice = format!(
                    "{}: Sorry, I couldn't generate a response.",
                    message.sender
                );
                self.send_prose(channel, target, &notice).await;
                return DispatchOutcome::CompletionFailed;
            }
        };

        self.gate.record_global();
        self.gate.record_identity(&message.sender);

        let format = if mode.expects_code() {
            FormatMode::Split
        } else {
            FormatMode::Prose
        };
        let chunks = self.formatter.format(&text, format);

        for chunk in &chunks {
            if let Err(e) = channel.send(&SendMessage::new(chunk.line(), target)).await {
                tracing::warn!("Failed to deliver reply to {target}: {e}");
                let notice = SendMessage::new(DELIVERY_FAILED_NOTICE, target);
                if let Err(e) = channel.send(&notice).await {
                    tracing::debug!("Delivery-failure notice also failed: {e}");
                }
                return DispatchOutcome::SendFailed;
            }
        }

        DispatchOutcome::Replied {
            chunks: chunks.len(),
        }
    }

    /// Send a short notice through the prose layout. Returns whether every
    /// chunk went out; failures are logged.
    async fn send_prose(&self, channel: &mut dyn Channel, target: &str, text: &str) -> bool {
        for chunk in self.formatter.format_prose(text) {
            if let Err(e) = channel.send(&SendMessage::new(chunk.line(), target)).await {
                tracing::warn!("Failed to send notice to {target} via {}: {e}", channel.name());
                return false;
            }
        }
        true
    }
}
