use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::market_data::MarketCoin;

/// Latest known state of one asset. Exactly one row per `asset_id`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssetSnapshot {
    pub asset_id: String,
    pub name: String,
    pub symbol: String,
    pub image_url: Option<String>,
    pub price: Option<f64>,
    pub market_cap: Option<f64>,
    pub change_24h: Option<f64>,
    pub high_24h: Option<f64>,
    pub low_24h: Option<f64>,
    pub total_volume: Option<f64>,
    pub circulating_supply: Option<f64>,
    /// Timestamp string as reported by the upstream.
    pub upstream_last_updated: Option<String>,
    /// When this row was written.
    pub observed_at: DateTime<Utc>,
}

impl AssetSnapshot {
    pub fn from_market(coin: &MarketCoin, observed_at: DateTime<Utc>) -> Self {
        Self {
            asset_id: coin.id.clone(),
            name: coin.name.clone(),
            symbol: coin.symbol.clone(),
            image_url: coin.image.clone(),
            price: coin.current_price,
            market_cap: coin.market_cap,
            change_24h: coin.price_change_percentage_24h,
            high_24h: coin.high_24h,
            low_24h: coin.low_24h,
            total_volume: coin.total_volume,
            circulating_supply: coin.circulating_supply,
            upstream_last_updated: coin.last_updated.clone(),
            observed_at,
        }
    }
}

/// One append-only observation of an asset.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryRecord {
    pub asset_id: String,
    pub name: String,
    pub symbol: String,
    pub price: Option<f64>,
    pub market_cap: Option<f64>,
    pub change_24h: Option<f64>,
    pub observed_at: DateTime<Utc>,
}

impl HistoryRecord {
    pub fn from_snapshot(snapshot: &AssetSnapshot) -> Self {
        Self {
            asset_id: snapshot.asset_id.clone(),
            name: snapshot.name.clone(),
            symbol: snapshot.symbol.clone(),
            price: snapshot.price,
            market_cap: snapshot.market_cap,
            change_24h: snapshot.change_24h,
            observed_at: snapshot.observed_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn bitcoin() -> MarketCoin {
        MarketCoin {
            id: "bitcoin".to_string(),
            name: "Bitcoin".to_string(),
            symbol: "btc".to_string(),
            image: Some("https://img.example/btc.png".to_string()),
            current_price: Some(50000.0),
            market_cap: Some(900_000_000_000.0),
            price_change_percentage_24h: Some(2.5),
            high_24h: Some(51000.0),
            low_24h: Some(49000.0),
            total_volume: Some(30_000_000_000.0),
            circulating_supply: Some(19_500_000.0),
            last_updated: Some("2024-05-01T11:59:30.000Z".to_string()),
        }
    }

    #[test]
    fn snapshot_copies_every_upstream_field() {
        let at = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
        let snapshot = AssetSnapshot::from_market(&bitcoin(), at);

        assert_eq!(snapshot.asset_id, "bitcoin");
        assert_eq!(snapshot.price, Some(50000.0));
        assert_eq!(snapshot.market_cap, Some(900_000_000_000.0));
        assert_eq!(snapshot.change_24h, Some(2.5));
        assert_eq!(snapshot.high_24h, Some(51000.0));
        assert_eq!(snapshot.low_24h, Some(49000.0));
        assert_eq!(snapshot.circulating_supply, Some(19_500_000.0));
        assert_eq!(
            snapshot.upstream_last_updated.as_deref(),
            Some("2024-05-01T11:59:30.000Z")
        );
        assert_eq!(snapshot.observed_at, at);
    }

    #[test]
    fn snapshot_serializes_camel_case() {
        let at = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
        let value = serde_json::to_value(AssetSnapshot::from_market(&bitcoin(), at)).unwrap();

        assert_eq!(value["assetId"], "bitcoin");
        assert_eq!(value["imageUrl"], "https://img.example/btc.png");
        assert_eq!(value["change24h"], 2.5);
        assert_eq!(value["marketCap"], 900_000_000_000.0);
        assert!(value.get("observedAt").is_some());
    }

    #[test]
    fn history_record_shares_snapshot_timestamp() {
        let at = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
        let snapshot = AssetSnapshot::from_market(&bitcoin(), at);
        let record = HistoryRecord::from_snapshot(&snapshot);

        assert_eq!(record.asset_id, "bitcoin");
        assert_eq!(record.price, Some(50000.0));
        assert_eq!(record.observed_at, at);
    }
}
