use async_trait::async_trait;

/// A message to deliver to a channel or nick.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SendMessage {
    pub content: String,
    pub recipient: String,
}

impl SendMessage {
    pub fn new(content: impl Into<String>, recipient: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            recipient: recipient.into(),
        }
    }
}

/// Outbound side of a chat transport.
///
/// Each call delivers exactly one protocol message. Callers do the
/// segmentation; implementations own pacing.
#[async_trait]
pub trait Channel: Send {
    /// Human-readable channel name
    fn name(&self) -> &str;

    /// Send a single, already formatted message
    async fn send(&mut self, message: &SendMessage) -> anyhow::Result<()>;
}
