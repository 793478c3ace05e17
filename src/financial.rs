//! Synthetic market, portfolio and news data behind the `{success, data |
//! error, source}` envelope. Swapping in a live provider only has to keep the
//! envelope shape.

use crate::{cache::CacheService, models::*};
use chrono::{Duration, Utc};
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;

const OVERVIEW_CACHE_SYMBOL: &str = "overview";

pub struct FinancialDataService {
    cache: Arc<CacheService>,
}

impl FinancialDataService {
    pub fn new(cache: Arc<CacheService>) -> Self {
        Self { cache }
    }

    pub fn get_stock_quote(&self, symbol: &str) -> DataEnvelope<StockQuote> {
        let quote = StockQuote {
            symbol: symbol.to_uppercase(),
            price: 150.25,
            change: 2.50,
            change_percent: 1.69,
            volume: 1_234_567,
            previous_close: 147.75,
            open: 148.00,
            high: 151.00,
            low: 147.50,
            timestamp: Utc::now(),
            market_cap: 2_500_000_000,
            pe_ratio: 15.5,
            dividend_yield: 2.1,
        };

        tracing::info!("Retrieved stock quote for {}", symbol);
        DataEnvelope::ok(quote, "mock_polygon")
    }

    pub async fn get_market_overview(&self) -> DataEnvelope<MarketOverview> {
        if let Some(cached) = self
            .cache
            .get_cached_market_data::<MarketOverview>(OVERVIEW_CACHE_SYMBOL)
            .await
        {
            return DataEnvelope::ok(cached, "mock_market_data");
        }

        let indices = BTreeMap::from([
            ("SPY".to_string(), index(445.67, 1.23, 0.28)),
            ("QQQ".to_string(), index(378.45, -0.89, -0.23)),
            ("IWM".to_string(), index(198.32, 0.45, 0.23)),
        ]);
        let sectors = BTreeMap::from([
            ("Technology".to_string(), SectorMove { change_percent: 0.5 }),
            ("Healthcare".to_string(), SectorMove { change_percent: -0.2 }),
            ("Finance".to_string(), SectorMove { change_percent: 0.8 }),
            ("Energy".to_string(), SectorMove { change_percent: 1.2 }),
        ]);

        let overview = MarketOverview {
            indices,
            sectors,
            market_sentiment: "neutral".to_string(),
            vix: 18.45,
            timestamp: Utc::now(),
        };

        // Cache for 1 minute
        self.cache
            .cache_market_data(OVERVIEW_CACHE_SYMBOL, &overview)
            .await;

        DataEnvelope::ok(overview, "mock_market_data")
    }

    /// The analysis is synthetic; the submitted portfolio does not change it.
    pub fn get_portfolio_analysis(&self, _portfolio: &Value) -> DataEnvelope<PortfolioAnalysis> {
        let sectors = BTreeMap::from([
            ("Technology".to_string(), 35.0),
            ("Healthcare".to_string(), 20.0),
            ("Finance".to_string(), 15.0),
            ("Consumer".to_string(), 12.0),
            ("Energy".to_string(), 8.0),
            ("Other".to_string(), 10.0),
        ]);

        let analysis = PortfolioAnalysis {
            total_value: 125_000.00,
            daily_change: 1_250.00,
            daily_change_percent: 1.01,
            diversification_score: 0.78,
            risk_level: "moderate".to_string(),
            sectors,
            top_performers: vec![
                performer("AAPL", 8.5),
                performer("MSFT", 6.2),
                performer("GOOGL", 4.8),
            ],
            recommendations: vec![
                "Consider rebalancing technology allocation".to_string(),
                "Diversify into international markets".to_string(),
                "Review bond allocation for age-appropriate risk".to_string(),
            ],
            timestamp: Utc::now(),
        };

        DataEnvelope::ok(analysis, "mock_portfolio_analysis")
    }

    /// Cached per symbol set; `limit` is applied after the cache read.
    pub async fn get_financial_news(&self, symbols: &[String], limit: usize) -> DataEnvelope<Vec<NewsArticle>> {
        let joined = symbols.join(",");
        let key = CacheService::news_key((!joined.is_empty()).then_some(joined.as_str()));

        if let Some(mut cached) = self.cache.get::<Vec<NewsArticle>>(&key).await {
            cached.truncate(limit);
            return DataEnvelope::ok(cached, "mock_marketaux");
        }

        let now = Utc::now();
        let mut news = vec![
            NewsArticle {
                title: "Market Analysis: Tech Stocks Show Resilience".to_string(),
                description: "Technology stocks continue to outperform expectations despite market volatility..."
                    .to_string(),
                source: "Financial Times".to_string(),
                published_at: now - Duration::hours(2),
                url: "https://example.com/news/1".to_string(),
                sentiment: "positive".to_string(),
                relevance_score: 0.85,
            },
            NewsArticle {
                title: "Federal Reserve Signals Interest Rate Stability".to_string(),
                description: "The Federal Reserve indicated that interest rates will remain stable in the near term..."
                    .to_string(),
                source: "Wall Street Journal".to_string(),
                published_at: now - Duration::hours(4),
                url: "https://example.com/news/2".to_string(),
                sentiment: "neutral".to_string(),
                relevance_score: 0.92,
            },
            NewsArticle {
                title: "Cryptocurrency Market Sees Mixed Signals".to_string(),
                description: "Bitcoin and other cryptocurrencies show mixed performance as institutional adoption continues..."
                    .to_string(),
                source: "CoinDesk".to_string(),
                published_at: now - Duration::hours(6),
                url: "https://example.com/news/3".to_string(),
                sentiment: "mixed".to_string(),
                relevance_score: 0.78,
            },
        ];
        self.cache.set(&key, &news, None).await;
        news.truncate(limit);

        DataEnvelope::ok(news, "mock_marketaux")
    }

    pub fn get_economic_indicators(&self) -> DataEnvelope<EconomicIndicators> {
        let indicators = EconomicIndicators {
            unemployment_rate: 3.7,
            inflation_rate: 2.4,
            gdp_growth: 2.1,
            consumer_confidence: 104.5,
            interest_rate: 5.25,
            dollar_index: 103.45,
            oil_price: 78.32,
            gold_price: 1985.67,
            timestamp: Utc::now(),
        };

        DataEnvelope::ok(indicators, "mock_economic_data")
    }

    pub fn search_instruments(&self, query: &str) -> DataEnvelope<Vec<InstrumentMatch>> {
        tracing::debug!("Instrument search for {:?}", query);
        let results = vec![
            InstrumentMatch {
                symbol: "AAPL".to_string(),
                name: "Apple Inc.".to_string(),
                instrument_type: "stock".to_string(),
                exchange: "NASDAQ".to_string(),
                price: 175.43,
                change_percent: 0.85,
            },
            InstrumentMatch {
                symbol: "MSFT".to_string(),
                name: "Microsoft Corporation".to_string(),
                instrument_type: "stock".to_string(),
                exchange: "NASDAQ".to_string(),
                price: 338.11,
                change_percent: 1.25,
            },
        ];

        DataEnvelope::ok(results, "mock_search")
    }
}

fn index(price: f64, change: f64, change_percent: f64) -> IndexQuote {
    IndexQuote {
        price,
        change,
        change_percent,
    }
}

fn performer(symbol: &str, return_percent: f64) -> Performer {
    Performer {
        symbol: symbol.to_string(),
        return_percent,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use serde_json::json;

    fn service() -> FinancialDataService {
        let cache = CacheService::new(Some(Arc::new(MemoryStore::new())));
        FinancialDataService::new(Arc::new(cache))
    }

    #[tokio::test]
    async fn market_overview_is_served_from_cache_on_repeat() {
        let svc = service();
        let first = svc.get_market_overview().await;
        assert!(first.success);
        let first = first.data.unwrap();
        assert_eq!(first.indices.len(), 3);

        let second = svc.get_market_overview().await.data.unwrap();
        assert_eq!(second.timestamp, first.timestamp);
    }

    #[tokio::test]
    async fn news_respects_limit_on_fresh_and_cached_reads() {
        let svc = service();
        assert_eq!(svc.get_financial_news(&[], 2).await.data.unwrap().len(), 2);
        assert_eq!(svc.get_financial_news(&[], 10).await.data.unwrap().len(), 3);

        let symbols = vec!["AAPL".to_string(), "MSFT".to_string()];
        svc.get_financial_news(&symbols, 1).await;
        let cached: Vec<NewsArticle> = svc.cache.get("news:AAPL,MSFT").await.unwrap();
        assert_eq!(cached.len(), 3);
    }

    #[test]
    fn envelopes_carry_their_source() {
        let svc = service();
        assert_eq!(svc.get_stock_quote("aapl").data.unwrap().symbol, "AAPL");
        assert_eq!(svc.get_economic_indicators().source, "mock_economic_data");
        assert_eq!(svc.search_instruments("apple").data.unwrap()[0].symbol, "AAPL");

        let analysis = svc.get_portfolio_analysis(&json!({}));
        assert_eq!(analysis.source, "mock_portfolio_analysis");
        let value = serde_json::to_value(analysis.data.unwrap()).unwrap();
        assert_eq!(value["top_performers"][0]["return"], 8.5);
    }
}
