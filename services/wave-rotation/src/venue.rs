//! Venue capability interface and registry
//!
//! A venue moves the whole position in or out of one pool. Venue types are
//! a closed set parsed once from configuration; an unknown type is a
//! configuration error.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info};
use uuid::Uuid;

use crate::config::{validate_address, ControllerConfig, ExecutionMode, VenueSpec};
use crate::error::ConfigError;

/// Result status of a venue call
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VenueStatus {
    Ok,
    NoAssets,
    NoShares,
    Blocked,
    Error,
    NotImplemented,
}

impl VenueStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            VenueStatus::Ok => "ok",
            VenueStatus::NoAssets => "no_assets",
            VenueStatus::NoShares => "no_shares",
            VenueStatus::Blocked => "blocked",
            VenueStatus::Error => "error",
            VenueStatus::NotImplemented => "not_implemented",
        }
    }

    /// Statuses that count against the kill switch
    pub fn is_failure(&self) -> bool {
        matches!(self, VenueStatus::Error | VenueStatus::NotImplemented)
    }

    /// Statuses after which funds are known to be out of the venue
    pub fn is_clear(&self) -> bool {
        matches!(self, VenueStatus::Ok | VenueStatus::NoShares | VenueStatus::NoAssets)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VenueOutcome {
    pub status: VenueStatus,
    pub tx_ref: Option<String>,
    pub message: Option<String>,
}

impl VenueOutcome {
    pub fn ok(tx_ref: impl Into<String>) -> Self {
        Self {
            status: VenueStatus::Ok,
            tx_ref: Some(tx_ref.into()),
            message: None,
        }
    }

    pub fn status(status: VenueStatus) -> Self {
        Self {
            status,
            tx_ref: None,
            message: None,
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            status: VenueStatus::Error,
            tx_ref: None,
            message: Some(message.into()),
        }
    }
}

/// Whole-position deposit/withdraw for one pool
#[async_trait::async_trait]
pub trait Venue: Send + Sync {
    fn kind(&self) -> &str;

    /// Deposits need a token approval first
    fn requires_approval(&self) -> bool {
        false
    }

    async fn deposit_all(&self) -> VenueOutcome;

    async fn withdraw_all(&self) -> VenueOutcome;
}

/// Venue types understood by the registry
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VenueKind {
    Paper,
    Erc4626 { vault: String },
    AaveV3 { pool: String, asset: String },
    Comet { market: String, asset: String },
}

impl VenueKind {
    /// Parse and validate one configured venue
    pub fn from_spec(pool_id: &str, spec: &VenueSpec) -> Result<Self, ConfigError> {
        let param = |name: &str| -> Result<String, ConfigError> {
            let key = format!("venues.{}.{}", pool_id, name);
            let value = spec
                .params
                .get(name)
                .cloned()
                .ok_or_else(|| ConfigError::Missing(key.clone()))?;
            validate_address(&key, &value)?;
            Ok(value)
        };

        match spec.kind.to_lowercase().as_str() {
            "paper" => Ok(VenueKind::Paper),
            "erc4626" => Ok(VenueKind::Erc4626 { vault: param("vault")? }),
            "aave_v3" => Ok(VenueKind::AaveV3 {
                pool: param("pool")?,
                asset: param("asset")?,
            }),
            "comet" => Ok(VenueKind::Comet {
                market: param("market")?,
                asset: param("asset")?,
            }),
            other => Err(ConfigError::UnknownVenueType {
                pool_id: pool_id.to_string(),
                kind: other.to_string(),
            }),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            VenueKind::Paper => "paper",
            VenueKind::Erc4626 { .. } => "erc4626",
            VenueKind::AaveV3 { .. } => "aave_v3",
            VenueKind::Comet { .. } => "comet",
        }
    }

    pub fn requires_approval(&self) -> bool {
        !matches!(self, VenueKind::Paper)
    }
}

/// Simulated venue; moves nothing
#[derive(Debug, Default)]
pub struct PaperVenue;

#[async_trait::async_trait]
impl Venue for PaperVenue {
    fn kind(&self) -> &str {
        "paper"
    }

    async fn deposit_all(&self) -> VenueOutcome {
        VenueOutcome::ok(format!("paper:deposit:{}", Uuid::new_v4().simple()))
    }

    async fn withdraw_all(&self) -> VenueOutcome {
        VenueOutcome::ok(format!("paper:withdraw:{}", Uuid::new_v4().simple()))
    }
}

/// Configured on-chain venue without an injected implementation
#[derive(Debug)]
pub struct UnboundVenue {
    kind: VenueKind,
}

#[async_trait::async_trait]
impl Venue for UnboundVenue {
    fn kind(&self) -> &str {
        self.kind.name()
    }

    fn requires_approval(&self) -> bool {
        self.kind.requires_approval()
    }

    async fn deposit_all(&self) -> VenueOutcome {
        VenueOutcome {
            status: VenueStatus::NotImplemented,
            tx_ref: None,
            message: Some(format!("no {} executor bound", self.kind.name())),
        }
    }

    async fn withdraw_all(&self) -> VenueOutcome {
        VenueOutcome {
            status: VenueStatus::NotImplemented,
            tx_ref: None,
            message: Some(format!("no {} executor bound", self.kind.name())),
        }
    }
}

/// Pool id -> venue, resolved once per cycle
#[derive(Clone, Default)]
pub struct VenueRegistry {
    venues: HashMap<String, Arc<dyn Venue>>,
    paper_fallback: bool,
}

impl VenueRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every pool resolves to a paper venue
    pub fn paper() -> Self {
        Self {
            venues: HashMap::new(),
            paper_fallback: true,
        }
    }

    /// Build from configuration; unknown types fail here
    pub fn from_config(cfg: &ControllerConfig) -> Result<Self, ConfigError> {
        let mut registry = match cfg.mode {
            ExecutionMode::Paper => Self::paper(),
            ExecutionMode::Live => Self::new(),
        };

        for (pool_id, spec) in &cfg.venues {
            let kind = VenueKind::from_spec(pool_id, spec)?;
            let venue: Arc<dyn Venue> = match (cfg.mode, &kind) {
                (ExecutionMode::Paper, _) | (_, VenueKind::Paper) => Arc::new(PaperVenue),
                (ExecutionMode::Live, _) => Arc::new(UnboundVenue { kind: kind.clone() }),
            };
            debug!("Venue {} -> {}", pool_id, kind.name());
            registry.venues.insert(pool_id.to_lowercase(), venue);
        }

        info!(
            "Venue registry: {} configured ({} mode)",
            registry.venues.len(),
            cfg.mode
        );
        Ok(registry)
    }

    /// Bind an implementation to a pool, replacing any configured one
    pub fn register(&mut self, pool_id: impl Into<String>, venue: Arc<dyn Venue>) {
        self.venues.insert(pool_id.into().to_lowercase(), venue);
    }

    pub fn resolve(&self, pool_id: &str) -> Option<Arc<dyn Venue>> {
        match self.venues.get(&pool_id.to_lowercase()) {
            Some(venue) => Some(venue.clone()),
            None if self.paper_fallback => Some(Arc::new(PaperVenue)),
            None => None,
        }
    }

    pub fn contains(&self, pool_id: &str) -> bool {
        self.paper_fallback || self.venues.contains_key(&pool_id.to_lowercase())
    }

    pub fn len(&self) -> usize {
        self.venues.len()
    }

    pub fn is_empty(&self) -> bool {
        self.venues.is_empty()
    }
}
