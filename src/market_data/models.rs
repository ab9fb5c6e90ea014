use serde::{Deserialize, Serialize};

/// One row of the upstream `/coins/markets` response.
///
/// Numeric fields are optional because the upstream sends `null` for
/// freshly listed or illiquid assets.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarketCoin {
    pub id: String,
    pub name: String,
    pub symbol: String,
    #[serde(default)]
    pub image: Option<String>,
    #[serde(default)]
    pub current_price: Option<f64>,
    #[serde(default)]
    pub market_cap: Option<f64>,
    #[serde(default)]
    pub price_change_percentage_24h: Option<f64>,
    #[serde(default)]
    pub high_24h: Option<f64>,
    #[serde(default)]
    pub low_24h: Option<f64>,
    #[serde(default)]
    pub total_volume: Option<f64>,
    #[serde(default)]
    pub circulating_supply: Option<f64>,
    #[serde(default)]
    pub last_updated: Option<String>,
}

/// Parameters of a markets request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MarketsQuery {
    pub vs_currency: String,
    pub order: String,
    pub per_page: u32,
    pub page: u32,
}

impl MarketsQuery {
    /// Top `per_page` assets by market cap, priced in `vs_currency`.
    pub fn top_by_market_cap(vs_currency: impl Into<String>, per_page: u32) -> Self {
        Self {
            vs_currency: vs_currency.into().to_lowercase(),
            order: "market_cap_desc".to_string(),
            per_page,
            page: 1,
        }
    }

    pub fn as_params(&self) -> [(&'static str, String); 4] {
        [
            ("vs_currency", self.vs_currency.clone()),
            ("order", self.order.clone()),
            ("per_page", self.per_page.to_string()),
            ("page", self.page.to_string()),
        ]
    }
}

impl Default for MarketsQuery {
    fn default() -> Self {
        Self::top_by_market_cap("usd", 10)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_row_with_nulls() {
        let row: MarketCoin = serde_json::from_str(
            r#"{
                "id": "newcoin",
                "symbol": "new",
                "name": "New Coin",
                "image": null,
                "current_price": 0.12,
                "market_cap": null,
                "price_change_percentage_24h": null,
                "circulating_supply": null,
                "last_updated": "2024-05-01T12:00:00.000Z",
                "ath": 1.5
            }"#,
        )
        .unwrap();

        assert_eq!(row.id, "newcoin");
        assert_eq!(row.current_price, Some(0.12));
        assert_eq!(row.market_cap, None);
        assert_eq!(row.high_24h, None);
        assert_eq!(row.image, None);
    }

    #[test]
    fn default_query_is_top_ten_usd() {
        let query = MarketsQuery::default();
        assert_eq!(
            query.as_params(),
            [
                ("vs_currency", "usd".to_string()),
                ("order", "market_cap_desc".to_string()),
                ("per_page", "10".to_string()),
                ("page", "1".to_string()),
            ]
        );
    }

    #[test]
    fn quote_currency_is_lowercased() {
        assert_eq!(MarketsQuery::top_by_market_cap("EUR", 5).vs_currency, "eur");
    }
}
