use crate::error::Result;

/// Trait for anything that can produce fresh `define(...)` lines
#[async_trait::async_trait]
pub trait SecretSource: Send + Sync {
    /// Fetch the raw response body; performs exactly one attempt
    async fn fetch(&self) -> Result<String>;

    /// Get the source type name for display purposes
    fn source_type(&self) -> &'static str;
}
