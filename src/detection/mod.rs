//! Detection pipeline: strategy selection, bounded retries and caching
//!
//! Per-request flow inside [`DetectionOrchestrator::detect_one`]:
//!
//! ```text
//! PENDING ──validate──► CACHE_CHECK ──hit──────────────────────────► DONE
//!    │                      │
//!    └─invalid──► DONE      └─miss─► STRATEGY_SELECT ─► EXECUTE ──ok──► cache.set ─► DONE
//!                                          │               │  ▲
//!                                          │               └──┘ retryable error,
//!                                          │                    attempts left
//!                                          └─none──► DONE (failed, never cached)
//! ```

pub mod error;
pub mod orchestrator;
pub mod registry;
pub mod strategies;
pub mod strategy;
pub mod types;

pub use error::{DetectionError, SetupError};
pub use orchestrator::{DetectionOrchestrator, OrchestratorStats, cache_key};
pub use registry::{StrategyInfo, StrategyRegistry};
pub use strategy::{Collaborators, StatsSnapshot, Strategy, StrategyStats};
pub use types::{DetectionResult, RawRelease, SoftwareRequest};
