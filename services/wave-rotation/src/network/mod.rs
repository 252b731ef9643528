//! Network Resilience Layer
//!
//! An injected [`RpcEndpointPool`] owns the ranked endpoint list and the
//! active connection. Selection walks the ring once, validating chain id
//! and block freshness; call failures fail over to the next endpoint and
//! retry under a [`RetryPolicy`].

pub mod client;
pub mod retry;

use chrono::Duration as ChronoDuration;
use serde::Serialize;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::clock::Clock;
use crate::config::NetworkConfig;
use crate::error::{NetworkError, RpcError};
pub use client::{ChainClient, ChainConnector, HttpConnector, JsonRpcClient};
pub use retry::{FailureKind, RetryPolicy};

/// Connection state of the pool
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "state", content = "index", rename_all = "snake_case")]
pub enum EndpointState {
    Disconnected,
    Probing(usize),
    Connected(usize),
}

/// What a probed endpoint must satisfy
#[derive(Debug, Clone)]
pub struct ProbeRules {
    pub allowed_chain_ids: Vec<u64>,
    pub max_block_staleness: ChronoDuration,
}

impl ProbeRules {
    pub fn from_config(cfg: &NetworkConfig) -> Self {
        Self {
            allowed_chain_ids: cfg.allowed_chain_ids.clone(),
            max_block_staleness: ChronoDuration::seconds(cfg.max_block_staleness_secs),
        }
    }
}

/// Snapshot for status output
#[derive(Debug, Clone, Serialize)]
pub struct RpcInfo {
    pub url: Option<String>,
    pub index: Option<usize>,
    pub state: EndpointState,
    pub allowed_chain_ids: Vec<u64>,
    pub last_switch_reason: Option<String>,
}

pub struct RpcEndpointPool {
    endpoints: Vec<String>,
    rules: ProbeRules,
    retry: RetryPolicy,
    connector: Arc<dyn ChainConnector>,
    clock: Arc<dyn Clock>,
    state: EndpointState,
    active: Option<Arc<dyn ChainClient>>,
    last_switch_reason: Option<String>,
}

impl RpcEndpointPool {
    pub fn new(
        endpoints: Vec<String>,
        rules: ProbeRules,
        retry: RetryPolicy,
        connector: Arc<dyn ChainConnector>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            endpoints,
            rules,
            retry,
            connector,
            clock,
            state: EndpointState::Disconnected,
            active: None,
            last_switch_reason: None,
        }
    }

    /// Pool over real HTTP endpoints
    pub fn from_config(cfg: &NetworkConfig, clock: Arc<dyn Clock>) -> Self {
        Self::new(
            cfg.endpoints.clone(),
            ProbeRules::from_config(cfg),
            RetryPolicy::from_config(&cfg.retry),
            Arc::new(HttpConnector::new(Duration::from_secs(cfg.timeout_secs))),
            clock,
        )
    }

    pub fn state(&self) -> EndpointState {
        self.state
    }

    pub fn active_index(&self) -> Option<usize> {
        match self.state {
            EndpointState::Connected(i) => Some(i),
            _ => None,
        }
    }

    pub fn endpoints(&self) -> &[String] {
        &self.endpoints
    }

    pub fn info(&self) -> RpcInfo {
        let index = self.active_index();
        RpcInfo {
            url: index.and_then(|i| self.endpoints.get(i).cloned()),
            index,
            state: self.state,
            allowed_chain_ids: self.rules.allowed_chain_ids.clone(),
            last_switch_reason: self.last_switch_reason.clone(),
        }
    }

    /// Select an endpoint probing the full ring from index 0
    pub async fn connect(&mut self) -> Result<(), NetworkError> {
        self.select_from(0, "startup").await
    }

    /// Move to the next healthy endpoint after the active one
    pub async fn failover(&mut self, reason: &str) -> Result<(), NetworkError> {
        let start = self.active_index().map(|i| i + 1).unwrap_or(0);
        warn!("RPC failover from {:?}: {}", self.info().url, reason);
        self.select_from(start, reason).await
    }

    async fn select_from(&mut self, start: usize, reason: &str) -> Result<(), NetworkError> {
        let n = self.endpoints.len();
        if n == 0 {
            self.state = EndpointState::Disconnected;
            return Err(NetworkError::NoEndpoints);
        }

        self.active = None;
        let mut attempts = Vec::with_capacity(n);
        for offset in 0..n {
            let index = (start + offset) % n;
            self.state = EndpointState::Probing(index);
            let url = self.endpoints[index].clone();
            match self.probe(&url).await {
                Ok(client) => {
                    info!("RPC connected: {} (index {}, reason {})", url, index, reason);
                    self.active = Some(client);
                    self.state = EndpointState::Connected(index);
                    self.last_switch_reason = Some(reason.to_string());
                    return Ok(());
                }
                Err(e) => {
                    warn!("RPC probe failed for {}: {}", url, e);
                    attempts.push((url, e.to_string()));
                }
            }
        }

        self.state = EndpointState::Disconnected;
        Err(NetworkError::FailoverExhausted { attempts })
    }

    /// Reachability, chain identity, then block freshness
    async fn probe(&self, url: &str) -> Result<Arc<dyn ChainClient>, RpcError> {
        let client = self.connector.connect(url)?;

        let chain_id = client.chain_id().await?;
        if !self.rules.allowed_chain_ids.contains(&chain_id) {
            return Err(RpcError::ChainMismatch {
                actual: chain_id,
                allowed: self.rules.allowed_chain_ids.clone(),
            });
        }

        let block_ts = client.latest_block_timestamp().await?;
        let age = self.clock.now() - block_ts;
        if age > self.rules.max_block_staleness {
            return Err(RpcError::StaleBlock {
                age_secs: age.num_seconds(),
                max_secs: self.rules.max_block_staleness.num_seconds(),
            });
        }
        debug!("Probe ok: {} chain {} block age {}s", url, chain_id, age.num_seconds());
        Ok(client)
    }

    /// Run `op` against the active endpoint, failing over between attempts
    pub async fn call<T, F, Fut>(&mut self, label: &str, mut op: F) -> Result<T, NetworkError>
    where
        F: FnMut(Arc<dyn ChainClient>) -> Fut,
        Fut: Future<Output = Result<T, RpcError>>,
    {
        if self.active.is_none() {
            self.connect().await?;
        }

        let mut attempt = 0;
        loop {
            let client = match &self.active {
                Some(client) => client.clone(),
                None => return Err(NetworkError::NoEndpoints),
            };

            let err = match op(client).await {
                Ok(value) => return Ok(value),
                Err(e) => e,
            };

            if !retry::is_retryable(&err) {
                warn!("{} failed without retry: {}", label, err);
                return Err(NetworkError::NonRetryable(err));
            }

            attempt += 1;
            if attempt >= self.retry.max_attempts {
                return Err(NetworkError::RetriesExhausted { attempts: attempt, last: err });
            }

            let delay = self.retry.delay(attempt - 1);
            warn!(
                "{} failed (attempt {}/{}): {}; retrying in {:?}",
                label, attempt, self.retry.max_attempts, err, delay
            );
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            self.failover(&format!("{}:{}", label, err.kind())).await?;
        }
    }

    /// Current gas price in wei
    pub async fn gas_price_wei(&mut self) -> Result<u128, NetworkError> {
        self.call("eth_gasPrice", |client| async move { client.gas_price_wei().await })
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use chrono::{DateTime, TimeZone, Utc};
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[derive(Clone)]
    struct Behaviour {
        reachable: bool,
        chain_id: u64,
        block_age_secs: i64,
        failing_calls: Arc<AtomicU32>,
    }

    impl Behaviour {
        fn healthy() -> Self {
            Self {
                reachable: true,
                chain_id: 8453,
                block_age_secs: 2,
                failing_calls: Arc::new(AtomicU32::new(0)),
            }
        }
    }

    struct FakeChain {
        url: String,
        now: DateTime<Utc>,
        behaviour: Behaviour,
    }

    #[async_trait::async_trait]
    impl ChainClient for FakeChain {
        fn url(&self) -> &str {
            &self.url
        }

        async fn chain_id(&self) -> Result<u64, RpcError> {
            if !self.behaviour.reachable {
                return Err(RpcError::Transport("connection refused".to_string()));
            }
            Ok(self.behaviour.chain_id)
        }

        async fn latest_block_timestamp(&self) -> Result<DateTime<Utc>, RpcError> {
            Ok(self.now - ChronoDuration::seconds(self.behaviour.block_age_secs))
        }

        async fn gas_price_wei(&self) -> Result<u128, RpcError> {
            let remaining = self.behaviour.failing_calls.load(Ordering::SeqCst);
            if remaining > 0 {
                self.behaviour.failing_calls.fetch_sub(1, Ordering::SeqCst);
                return Err(RpcError::Timeout(Duration::from_secs(20)));
            }
            Ok(1_000_000_000)
        }
    }

    struct FakeConnector {
        now: DateTime<Utc>,
        behaviours: HashMap<String, Behaviour>,
    }

    impl ChainConnector for FakeConnector {
        fn connect(&self, url: &str) -> Result<Arc<dyn ChainClient>, RpcError> {
            let behaviour = self
                .behaviours
                .get(url)
                .cloned()
                .ok_or_else(|| RpcError::Transport(format!("unknown host {}", url)))?;
            Ok(Arc::new(FakeChain {
                url: url.to_string(),
                now: self.now,
                behaviour,
            }))
        }
    }

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 6, 1, 0, 0, 0).unwrap()
    }

    fn pool(behaviours: Vec<(&str, Behaviour)>, max_attempts: u32) -> RpcEndpointPool {
        let endpoints = behaviours.iter().map(|(u, _)| u.to_string()).collect();
        let connector = FakeConnector {
            now: now(),
            behaviours: behaviours.into_iter().map(|(u, b)| (u.to_string(), b)).collect(),
        };
        RpcEndpointPool::new(
            endpoints,
            ProbeRules {
                allowed_chain_ids: vec![8453],
                max_block_staleness: ChronoDuration::seconds(90),
            },
            RetryPolicy::immediate(max_attempts),
            Arc::new(connector),
            Arc::new(ManualClock::new(now())),
        )
    }

    #[tokio::test]
    async fn test_connect_skips_bad_endpoints_in_order() {
        let mut down = Behaviour::healthy();
        down.reachable = false;
        let mut wrong_chain = Behaviour::healthy();
        wrong_chain.chain_id = 1;
        let mut stale = Behaviour::healthy();
        stale.block_age_secs = 600;

        let mut pool = pool(
            vec![
                ("http://down", down),
                ("http://mainnet", wrong_chain),
                ("http://stale", stale),
                ("http://good", Behaviour::healthy()),
            ],
            2,
        );
        pool.connect().await.unwrap();
        assert_eq!(pool.state(), EndpointState::Connected(3));
        assert_eq!(pool.info().url.as_deref(), Some("http://good"));
        assert_eq!(pool.info().last_switch_reason.as_deref(), Some("startup"));
    }

    #[tokio::test]
    async fn test_exhaustion_is_loud_and_finite() {
        let mut down = Behaviour::healthy();
        down.reachable = false;
        let mut stale = Behaviour::healthy();
        stale.block_age_secs = 91;

        let mut pool = pool(vec![("http://a", down), ("http://b", stale)], 2);
        let err = pool.connect().await.unwrap_err();
        match &err {
            NetworkError::FailoverExhausted { attempts } => {
                assert_eq!(attempts.len(), 2);
                assert!(attempts[1].1.contains("stale block"));
            }
            other => panic!("unexpected {:?}", other),
        }
        assert!(err.to_string().starts_with("RPC_FAILOVER_EXHAUSTED"));
        assert_eq!(pool.state(), EndpointState::Disconnected);
    }

    #[tokio::test]
    async fn test_empty_pool() {
        let mut pool = pool(vec![], 2);
        assert!(matches!(pool.connect().await, Err(NetworkError::NoEndpoints)));
    }

    #[tokio::test]
    async fn test_call_fails_over_and_retries() {
        let flaky = Behaviour::healthy();
        flaky.failing_calls.store(1, Ordering::SeqCst);

        let mut pool = pool(vec![("http://primary", flaky), ("http://backup", Behaviour::healthy())], 3);
        let wei = pool.gas_price_wei().await.unwrap();
        assert_eq!(wei, 1_000_000_000);
        assert_eq!(pool.active_index(), Some(1));
        assert_eq!(pool.info().last_switch_reason.as_deref(), Some("eth_gasPrice:timeout"));
    }

    #[tokio::test]
    async fn test_call_gives_up_after_budget() {
        let a = Behaviour::healthy();
        a.failing_calls.store(10, Ordering::SeqCst);
        let b = Behaviour::healthy();
        b.failing_calls.store(10, Ordering::SeqCst);

        let mut pool = pool(vec![("http://a", a), ("http://b", b)], 3);
        match pool.gas_price_wei().await {
            Err(NetworkError::RetriesExhausted { attempts, .. }) => assert_eq!(attempts, 3),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_non_retryable_error_surfaces_immediately() {
        let mut pool = pool(vec![("http://a", Behaviour::healthy()), ("http://b", Behaviour::healthy())], 3);
        let result: Result<(), NetworkError> = pool
            .call("send", |_client| async {
                Err(RpcError::Response {
                    code: -32000,
                    message: "nonce too low".to_string(),
                })
            })
            .await;
        assert!(matches!(result, Err(NetworkError::NonRetryable(_))));
        assert_eq!(pool.active_index(), Some(0));
    }
}
