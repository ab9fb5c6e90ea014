use super::{MarketCoin, MarketsQuery};
use crate::error::UpstreamError;

/// A read-only provider of current market rows.
///
/// The pipeline holds a primary and an optional backup, both behind this trait.
#[async_trait::async_trait]
pub trait PriceSource: Send + Sync {
    async fn fetch_markets(&self, query: &MarketsQuery) -> Result<Vec<MarketCoin>, UpstreamError>;

    /// Cheap liveness check. Returns the HTTP status on success.
    async fn ping(&self) -> Result<u16, UpstreamError>;

    fn name(&self) -> &str;
}
