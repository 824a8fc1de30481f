#![deny(unsafe_code)]

//! SpriteNav core: heuristic offset discovery over large binary blobs.
//!
//! Confirmed objects go into a per-source [`SpatialIndex`]. Pattern analysis
//! over the index feeds a set of prediction strategies, and the
//! [`Navigator`] merges their output into a ranked list of offsets worth
//! probing next. A [`TieredCache`] keeps index snapshots and query results
//! across runs.

/// Cancellable periodic tokio tasks.
pub mod background;
/// Memory and disk cache tiers.
pub mod cache;
/// Decoder seam for verifying predicted offsets.
pub mod decode;
/// Ordered spatial index of discovered objects.
pub mod index;
/// Spacing, size, and region statistics plus similarity scoring.
pub mod intelligence;
/// Subscriber setup and warning capture.
pub mod logging;
/// Query orchestration.
pub mod navigator;
/// Statically registered plugins.
pub mod plugin;
/// Prediction strategies and their registry.
pub mod strategy;
/// Core value types.
pub mod types;

pub use cache::TieredCache;
pub use decode::{BlobDecoder, DecodeError, verify_prediction};
pub use index::{IndexSnapshot, IndexStatistics, SpatialIndex};
pub use intelligence::{PatternAnalysis, PatternAnalyzer, SimilarityEngine};
pub use navigator::{Navigator, NavigatorError, PerformanceMetrics};
pub use plugin::{Plugin, PluginManager};
pub use strategy::{Strategy, StrategyRegistry};
pub use types::{DiscoveredObject, Fingerprint, InvariantError, Prediction, RegionKind, SessionContext, StrategyKind};
