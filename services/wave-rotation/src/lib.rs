//! Wave Rotation Library
//!
//! Autonomous capital-rotation controller: scores yield venues, decides
//! whether to move a single custodial position, executes the move through
//! a venue interface and settles profit between capital and treasury.

pub mod amount;
pub mod clock;
pub mod config;
pub mod error;
pub mod guard;
pub mod kill_switch;
pub mod market;
pub mod network;
pub mod notify;
pub mod orchestrator;
pub mod policy;
pub mod run_lock;
pub mod scoring;
pub mod selection;
pub mod settlement;
pub mod state;
pub mod store;
pub mod summary;
pub mod treasury;
pub mod venue;

#[cfg(test)]
mod tests;

// Re-export main types for convenience
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{ControllerConfig, ExecutionMode};
pub use error::{ConfigError, ControllerError, NetworkError, RpcError};
pub use guard::{EconomicGuard, GuardDecision};
pub use kill_switch::KillSwitch;
pub use market::{MarketDataSource, PoolRecord, PricePoint, StaticSource};
pub use network::{ChainClient, ChainConnector, RetryPolicy, RpcEndpointPool};
pub use orchestrator::{Collaborators, Rotator, StatusReport};
pub use policy::{should_switch, SwitchDecision, SwitchPolicy};
pub use run_lock::RunLock;
pub use scoring::{PoolCandidate, ScoreEngine};
pub use settlement::{settle, SettlementEngine};
pub use state::{CapitalLedger, ControllerState, KillSwitchState, StateFiles};
pub use summary::CycleSummary;
pub use treasury::{PayoutOutcome, QuoteProvider, SwapQuote};
pub use venue::{Venue, VenueOutcome, VenueRegistry, VenueStatus};
