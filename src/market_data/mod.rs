mod models;
pub mod providers;
mod source;

pub use models::{MarketCoin, MarketsQuery};
pub use providers::CoinGeckoMarketsSource;
pub use source::PriceSource;
