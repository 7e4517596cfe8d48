pub mod schema;

pub use schema::{Config, IrcConfig, PromptConfig, ProviderConfig, RateLimitConfig};
