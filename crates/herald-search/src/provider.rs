use async_trait::async_trait;
use tracing::warn;

use crate::error::Result;

/// Answers a free-form query with text.
#[async_trait]
pub trait SearchProvider: Send + Sync {
    fn name(&self) -> &str;

    async fn search(&self, query: &str) -> Result<String>;
}

/// Run `query`, turning every failure (and blank answers) into `None`.
///
/// Failures are logged here so callers only deal with "content or nothing".
pub async fn search_or_none(provider: &dyn SearchProvider, query: &str) -> Option<String> {
    match provider.search(query).await {
        Ok(text) if !text.trim().is_empty() => Some(text),
        Ok(_) => {
            warn!(provider = provider.name(), "search returned blank text");
            None
        }
        Err(e) => {
            warn!(provider = provider.name(), error = %e, "search failed");
            None
        }
    }
}
