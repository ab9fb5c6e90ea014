pub mod coingecko;

pub use coingecko::CoinGeckoMarketsSource;
