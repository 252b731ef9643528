//! Treasury payout
//!
//! The treasury share of profit accumulates in the ledger's pending
//! balance until it is large enough to swap. A failed quote defers the
//! payout; it never fails the cycle.

use reqwest::Client;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::amount::{to_raw_amount, NATIVE_DECIMALS};
use crate::config::{TreasuryConfig, MIN_SLIPPAGE_BPS};
use crate::state::CapitalLedger;

/// Executable swap payload returned by the quote provider
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SwapQuote {
    pub to: String,
    pub data: String,
    pub value: String,
    pub buy_amount: String,
}

impl SwapQuote {
    /// Short reference recorded in the cycle summary
    pub fn reference(&self) -> String {
        let head: String = self.data.chars().take(18).collect();
        format!("quote:{}:{}", self.to.to_lowercase(), head)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum QuoteError {
    #[error("quote request failed: {0}")]
    Request(String),

    #[error("quote rejected: HTTP {0}")]
    Status(u16),

    #[error("incomplete quote: missing {0}")]
    Incomplete(String),

    #[error("invalid sell amount: {0}")]
    Amount(String),
}

/// Converts a base-asset amount into the treasury asset
#[async_trait::async_trait]
pub trait QuoteProvider: Send + Sync {
    async fn quote(&self, sell_amount: Decimal) -> Result<SwapQuote, QuoteError>;
}

/// 0x-style `swap/v1/quote` client
pub struct ZeroExClient {
    client: Client,
    url: String,
    api_key: Option<String>,
    sell_token: String,
    buy_token: String,
    slippage_bps: u32,
    taker: Option<String>,
}

impl ZeroExClient {
    pub fn new(cfg: &TreasuryConfig) -> anyhow::Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(cfg.timeout_secs))
            .build()?;
        Ok(Self {
            client,
            url: cfg.quote_url.trim_end_matches('/').to_string(),
            api_key: cfg.api_key.clone(),
            sell_token: cfg.sell_token.clone(),
            buy_token: cfg.buy_token.clone(),
            slippage_bps: cfg.slippage_bps.max(MIN_SLIPPAGE_BPS),
            taker: cfg.taker.clone(),
        })
    }

    fn slippage_fraction(&self) -> Decimal {
        Decimal::from(self.slippage_bps) / Decimal::from(10_000)
    }
}

#[async_trait::async_trait]
impl QuoteProvider for ZeroExClient {
    async fn quote(&self, sell_amount: Decimal) -> Result<SwapQuote, QuoteError> {
        let sell_wei = to_raw_amount(sell_amount, NATIVE_DECIMALS).map_err(|e| QuoteError::Amount(e.to_string()))?;

        let mut params = vec![
            ("sellToken", self.sell_token.clone()),
            ("buyToken", self.buy_token.clone()),
            ("sellAmount", sell_wei.to_string()),
            ("slippagePercentage", self.slippage_fraction().normalize().to_string()),
        ];
        if let Some(taker) = &self.taker {
            params.push(("takerAddress", taker.clone()));
        }

        let mut req = self.client.get(&self.url).query(&params);
        if let Some(key) = &self.api_key {
            req = req.header("0x-api-key", key);
        }

        debug!("Requesting treasury quote for {} wei", sell_wei);
        let resp = req.send().await.map_err(|e| QuoteError::Request(e.to_string()))?;
        if !resp.status().is_success() {
            return Err(QuoteError::Status(resp.status().as_u16()));
        }

        let payload: serde_json::Value = resp.json().await.map_err(|e| QuoteError::Request(e.to_string()))?;
        let field = |name: &str| -> Result<String, QuoteError> {
            match payload.get(name) {
                Some(serde_json::Value::String(s)) => Ok(s.clone()),
                Some(serde_json::Value::Number(n)) => Ok(n.to_string()),
                _ => Err(QuoteError::Incomplete(name.to_string())),
            }
        };

        Ok(SwapQuote {
            to: field("to")?,
            data: field("data")?,
            value: field("value")?,
            buy_amount: field("buyAmount")?,
        })
    }
}

/// What happened to this cycle's treasury share
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum PayoutOutcome {
    /// Automation off; the delta is booked for accounting only
    Disabled { booked: Decimal },
    /// Nothing to pay out
    Skipped,
    /// Held back for a later cycle
    Pending { pending: Decimal, reason: String },
    /// Quote obtained for the whole pending balance
    Sent { amount: Decimal, quote_ref: String },
}

impl PayoutOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            PayoutOutcome::Disabled { .. } => "disabled",
            PayoutOutcome::Skipped => "skipped",
            PayoutOutcome::Pending { .. } => "pending",
            PayoutOutcome::Sent { .. } => "sent",
        }
    }
}

pub struct TreasuryDispatcher {
    enabled: bool,
    min_swap_base: Decimal,
    provider: Option<Arc<dyn QuoteProvider>>,
}

impl TreasuryDispatcher {
    pub fn new(cfg: &TreasuryConfig, provider: Option<Arc<dyn QuoteProvider>>) -> Self {
        Self {
            enabled: cfg.enabled,
            min_swap_base: cfg.min_swap_base,
            provider,
        }
    }

    pub fn disabled() -> Self {
        Self {
            enabled: false,
            min_swap_base: Decimal::ZERO,
            provider: None,
        }
    }

    /// Book `delta` and try to pay out the pending balance
    pub async fn dispatch(&self, ledger: &mut CapitalLedger, delta: Decimal) -> PayoutOutcome {
        let delta = delta.max(Decimal::ZERO);

        if !self.enabled {
            if delta.is_zero() {
                return PayoutOutcome::Skipped;
            }
            ledger.treasury_total += delta;
            return PayoutOutcome::Disabled { booked: delta };
        }

        ledger.treasury_pending += delta;
        let pending = ledger.treasury_pending;
        if pending.is_zero() {
            return PayoutOutcome::Skipped;
        }
        if pending < self.min_swap_base {
            debug!(
                "Treasury pending {} below min swap {}",
                pending.normalize(),
                self.min_swap_base.normalize()
            );
            return PayoutOutcome::Pending {
                pending,
                reason: format!("below_min_swap:{}", self.min_swap_base.normalize()),
            };
        }

        let provider = match &self.provider {
            Some(provider) => provider,
            None => {
                return PayoutOutcome::Pending {
                    pending,
                    reason: "no_quote_provider".to_string(),
                }
            }
        };

        match provider.quote(pending).await {
            Ok(quote) => {
                let quote_ref = quote.reference();
                ledger.treasury_total += pending;
                ledger.treasury_pending = Decimal::ZERO;
                info!(
                    "Treasury payout {} quoted (buy amount {})",
                    pending.normalize(),
                    quote.buy_amount
                );
                PayoutOutcome::Sent {
                    amount: pending,
                    quote_ref,
                }
            }
            Err(e) => {
                warn!("Treasury payout deferred: {}", e);
                PayoutOutcome::Pending {
                    pending,
                    reason: format!("quote_failed: {}", e),
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;
    use wiremock::matchers::{header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const TAKER: &str = "0x2222222222222222222222222222222222222222";

    fn dec(s: &str) -> Decimal {
        Decimal::from_str(s).unwrap()
    }

    fn cfg(url: String) -> TreasuryConfig {
        TreasuryConfig {
            enabled: true,
            quote_url: url,
            api_key: Some("secret".to_string()),
            taker: Some(TAKER.to_string()),
            ..Default::default()
        }
    }

    fn quote_body() -> serde_json::Value {
        serde_json::json!({
            "to": "0xDef1C0ded9bec7F1a1670819833240f027b25EfF",
            "data": "0xd9627aa40000000000000000",
            "value": "1000000000000000",
            "buyAmount": "2950000",
        })
    }

    #[tokio::test]
    async fn test_zero_ex_request_shape() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/swap/v1/quote"))
            .and(query_param("sellToken", "ETH"))
            .and(query_param("sellAmount", "1000000000000000"))
            .and(query_param("slippagePercentage", "0.01"))
            .and(query_param("takerAddress", TAKER))
            .and(header("0x-api-key", "secret"))
            .respond_with(ResponseTemplate::new(200).set_body_json(quote_body()))
            .mount(&server)
            .await;

        let client = ZeroExClient::new(&cfg(format!("{}/swap/v1/quote", server.uri()))).unwrap();
        let quote = client.quote(dec("0.001")).await.unwrap();
        assert_eq!(quote.buy_amount, "2950000");
        assert!(quote.reference().starts_with("quote:0xdef1c0de"));
    }

    #[tokio::test]
    async fn test_incomplete_quote_rejected() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"to": "0x1"})))
            .mount(&server)
            .await;

        let client = ZeroExClient::new(&cfg(server.uri())).unwrap();
        assert!(matches!(client.quote(dec("0.001")).await, Err(QuoteError::Incomplete(_))));
    }

    #[tokio::test]
    async fn test_disabled_books_accounting_only() {
        let mut ledger = CapitalLedger::with_capital(Decimal::from(100));
        let outcome = TreasuryDispatcher::disabled().dispatch(&mut ledger, dec("2.5")).await;
        assert_eq!(outcome, PayoutOutcome::Disabled { booked: dec("2.5") });
        assert_eq!(ledger.treasury_total, dec("2.5"));
        assert_eq!(ledger.treasury_pending, Decimal::ZERO);
    }

    #[tokio::test]
    async fn test_pending_accumulates_below_min_swap() {
        let mut ledger = CapitalLedger::with_capital(Decimal::from(100));
        let dispatcher = TreasuryDispatcher::new(&cfg("http://unused".to_string()), None);
        let outcome = dispatcher.dispatch(&mut ledger, dec("0.0002")).await;
        assert_eq!(outcome.as_str(), "pending");
        let outcome = dispatcher.dispatch(&mut ledger, dec("0.0002")).await;
        assert_eq!(outcome.as_str(), "pending");
        assert_eq!(ledger.treasury_pending, dec("0.0004"));
        assert_eq!(ledger.treasury_total, Decimal::ZERO);
    }

    #[tokio::test]
    async fn test_quote_failure_defers_and_success_clears() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(503))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_json(quote_body()))
            .mount(&server)
            .await;

        let provider: Arc<dyn QuoteProvider> = Arc::new(ZeroExClient::new(&cfg(server.uri())).unwrap());
        let dispatcher = TreasuryDispatcher::new(&cfg(server.uri()), Some(provider));
        let mut ledger = CapitalLedger::with_capital(Decimal::from(100));

        let outcome = dispatcher.dispatch(&mut ledger, dec("0.001")).await;
        assert_eq!(outcome.as_str(), "pending");
        assert_eq!(ledger.treasury_pending, dec("0.001"));

        let outcome = dispatcher.dispatch(&mut ledger, dec("0.001")).await;
        match outcome {
            PayoutOutcome::Sent { amount, .. } => assert_eq!(amount, dec("0.002")),
            other => panic!("expected sent, got {:?}", other),
        }
        assert_eq!(ledger.treasury_pending, Decimal::ZERO);
        assert_eq!(ledger.treasury_total, dec("0.002"));
    }
}
