pub mod compatible;
pub mod traits;

pub use compatible::OpenAiCompatibleProvider;
pub use traits::{CompletionError, Provider};

use crate::config::Config;

/// Build the completion provider described by `config`.
pub fn create_provider(config: &Config) -> anyhow::Result<Box<dyn Provider>> {
    let provider = OpenAiCompatibleProvider::new(
        "Completion",
        &config.provider,
        config.api_key.as_deref().filter(|k| !k.trim().is_empty()),
    )?;
    Ok(Box::new(provider))
}
