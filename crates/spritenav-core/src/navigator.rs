//! Query orchestration over per-source spatial indexes.
//!
//! A [`Navigator`] owns one [`SpatialIndex`] per source identifier, the
//! tiered cache, the strategy registry, the plugin manager, and the session
//! context. It is constructed explicitly and shared as `Arc<Navigator>`;
//! [`Navigator::shutdown`] stops its background work and saves every index.

use std::collections::HashMap;
use std::ops::ControlFlow;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use spritenav_config::AppConfig;
use tracing::{debug, info, warn};

use crate::background::PeriodicTask;
use crate::cache::{TieredCache, analysis_key};
use crate::decode::BlobDecoder;
use crate::index::{IndexStatistics, SpatialIndex};
use crate::intelligence::predictor::dedupe;
use crate::intelligence::{PatternAnalysis, PatternAnalyzer, SimilarityEngine};
use crate::plugin::{PluginFactory, PluginManager, PluginMetadata, ScoreFn};
use crate::strategy::{
    HybridStrategy, RegistryError, SequentialStrategy, SimilarityStrategy, StatisticalStrategy, Strategy,
    StrategyError, StrategyRegistry, StrategyStats,
};
use crate::types::{DiscoveredObject, InvariantError, MAX_HINTS_LIMIT, Prediction, SessionContext, StrategyKind};

/// Offsets among this many most recent visits are never suggested.
pub const RECENT_VISIT_WINDOW: usize = 10;
/// Minimum score for [`Navigator::similar_to`] results.
pub const SIMILAR_MIN_SCORE: f64 = 0.5;

#[derive(Debug, thiserror::Error)]
pub enum NavigatorError {
    #[error(transparent)]
    Invariant(#[from] InvariantError),

    #[error(transparent)]
    Registry(#[from] RegistryError),
}

/// Running query counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct PerformanceMetrics {
    pub queries: u64,
    pub total_hints_generated: u64,
    pub successful_navigations: u64,
    pub cache_hits: u64,
    pub cache_misses: u64,
    /// Mean wall-clock time per query in milliseconds.
    pub average_query_ms: f64,
}

#[derive(Default)]
struct Metrics {
    total_hints: AtomicU64,
    successful: AtomicU64,
    cache_hits: AtomicU64,
    cache_misses: AtomicU64,
    latency: Mutex<(u64, f64)>,
}

impl Metrics {
    fn record_query(&self, hints: usize, elapsed: Duration) {
        self.total_hints.fetch_add(hints as u64, Ordering::Relaxed);
        let mut latency = self.latency.lock();
        let (count, mean) = &mut *latency;
        *count += 1;
        *mean += (elapsed.as_secs_f64() * 1000.0 - *mean) / *count as f64;
    }

    fn hit(&self) {
        self.cache_hits.fetch_add(1, Ordering::Relaxed);
    }

    fn miss(&self) {
        self.cache_misses.fetch_add(1, Ordering::Relaxed);
    }

    fn snapshot(&self) -> PerformanceMetrics {
        let (queries, average_query_ms) = *self.latency.lock();
        PerformanceMetrics {
            queries,
            total_hints_generated: self.total_hints.load(Ordering::Relaxed),
            successful_navigations: self.successful.load(Ordering::Relaxed),
            cache_hits: self.cache_hits.load(Ordering::Relaxed),
            cache_misses: self.cache_misses.load(Ordering::Relaxed),
            average_query_ms,
        }
    }
}

/// Engine entry point.
pub struct Navigator {
    config: AppConfig,
    indexes: RwLock<HashMap<String, Arc<SpatialIndex>>>,
    cache: Arc<TieredCache>,
    registry: RwLock<StrategyRegistry>,
    /// Bumped whenever the strategy set or learned strategy state changes.
    strategy_generation: AtomicU64,
    plugins: Mutex<PluginManager>,
    context: Mutex<SessionContext>,
    similarity: SimilarityEngine,
    analyzer: PatternAnalyzer,
    metrics: Metrics,
    persist_task: Mutex<Option<PeriodicTask>>,
}

impl Navigator {
    /// Build a navigator and its cache from configuration.
    pub fn new(config: AppConfig) -> Result<Self, NavigatorError> {
        let cache = if config.cache.disk_enabled {
            TieredCache::with_disk(
                config.cache.memory_capacity,
                &config.cache.cache_dir,
                config.cache.disk_capacity,
            )
        } else {
            TieredCache::in_memory(config.cache.memory_capacity)
        };
        Self::with_cache(config, Arc::new(cache))
    }

    /// Build a navigator around an existing cache.
    pub fn with_cache(config: AppConfig, cache: Arc<TieredCache>) -> Result<Self, NavigatorError> {
        let registry = builtin_registry(&config)?;

        let mut context = SessionContext::new(0);
        context.set_max_hints(config.navigator.max_hints)?;
        context.set_min_confidence(config.navigator.min_confidence)?;
        context.max_search_distance = config.navigator.max_search_distance;

        info!(
            strategies = ?registry.enabled_names(),
            default = registry.default_name().unwrap_or("none"),
            tiers = ?cache.tier_names(),
            "navigator ready"
        );

        Ok(Self {
            similarity: SimilarityEngine::new(config.intelligence.similarity_threshold),
            analyzer: PatternAnalyzer::from_config(&config.intelligence),
            config,
            indexes: RwLock::new(HashMap::new()),
            cache,
            registry: RwLock::new(registry),
            strategy_generation: AtomicU64::new(0),
            plugins: Mutex::new(PluginManager::new()),
            context: Mutex::new(context),
            metrics: Metrics::default(),
            persist_task: Mutex::new(None),
        })
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn cache(&self) -> &Arc<TieredCache> {
        &self.cache
    }

    // ── Sources ─────────────────────────────────────────────────────────

    /// Index for `source`, loading a cached snapshot or creating an empty
    /// index on first use. Resets the session's current offset.
    pub fn open_source(&self, source: &str, blob_size: u64) -> Arc<SpatialIndex> {
        let index = self.index_or_load(source, blob_size);
        if blob_size > 0 && index.blob_size() != blob_size {
            index.set_blob_size(blob_size);
        }
        self.context.lock().current_offset = 0;
        info!(source, blob_size, objects = index.len(), "opened source");
        index
    }

    pub fn index(&self, source: &str) -> Option<Arc<SpatialIndex>> {
        self.indexes.read().get(source).cloned()
    }

    pub fn sources(&self) -> Vec<String> {
        let mut sources: Vec<String> = self.indexes.read().keys().cloned().collect();
        sources.sort();
        sources
    }

    fn index_or_load(&self, source: &str, blob_size: u64) -> Arc<SpatialIndex> {
        if let Some(index) = self.index(source) {
            return index;
        }

        let loaded = match self.cache.get_snapshot(source) {
            Some(snapshot) => {
                self.metrics.hit();
                match SpatialIndex::from_snapshot(snapshot) {
                    Ok(index) => {
                        debug!(source, objects = index.len(), "restored index from cache");
                        Some(index)
                    }
                    Err(e) => {
                        warn!(source, error = %e, "cached snapshot rejected, starting empty");
                        None
                    }
                }
            }
            None => {
                self.metrics.miss();
                None
            }
        };
        let index = loaded.unwrap_or_else(|| {
            let size = if blob_size > 0 {
                blob_size
            } else {
                self.config.index.default_blob_size
            };
            SpatialIndex::with_density_bucket(size, self.config.index.density_bucket)
        });

        // Another caller may have won the race; keep theirs.
        let mut indexes = self.indexes.write();
        Arc::clone(
            indexes
                .entry(source.to_string())
                .or_insert_with(|| Arc::new(index)),
        )
    }

    /// Record a confirmed object. Returns false if an object with at least
    /// the same confidence already sits at that offset.
    pub fn report_discovery(&self, source: &str, object: DiscoveredObject) -> bool {
        let index = self.index_or_load(source, 0);
        let offset = object.offset();
        if !index.insert(object) {
            debug!(source, offset = %format!("{offset:#08X}"), "discovery not stored");
            return false;
        }

        self.cache.invalidate_derived(source);
        let analyzer = self.analyzer.clone();
        let weak = Arc::downgrade(&index);
        self.cache.schedule_precompute(
            analysis_key(source),
            Box::new(move || {
                let index = weak.upgrade().ok_or_else(|| "index dropped".to_string())?;
                Ok(crate::cache::CachedValue::Analysis(analyzer.analyze(&index)))
            }),
        );
        info!(source, offset = %format!("{offset:#08X}"), objects = index.len(), "discovery recorded");
        true
    }

    /// Pattern analysis for `source`, from the cache when it matches the
    /// current index version.
    pub fn analysis(&self, source: &str) -> Option<PatternAnalysis> {
        let index = self.index(source)?;
        if let Some(cached) = self.cache.get_analysis(source)
            && cached.index_version == index.version()
        {
            return Some(cached);
        }
        let analysis = self.analyzer.analyze(&index);
        self.cache.put_analysis(source, analysis.clone());
        Some(analysis)
    }

    pub fn statistics(&self, source: &str) -> Option<IndexStatistics> {
        self.index(source).map(|index| index.statistics())
    }

    // ── Queries ─────────────────────────────────────────────────────────

    /// Rank likely object offsets near `offset` using the session context.
    ///
    /// `strategies` restricts the query to the named strategies; otherwise
    /// every enabled strategy runs. Fails only for a `max_hints` outside
    /// 1..=100.
    pub fn predict(
        &self,
        source: &str,
        offset: u64,
        max_hints: usize,
        strategies: Option<&[&str]>,
    ) -> Result<Vec<Prediction>, NavigatorError> {
        if max_hints == 0 || max_hints > MAX_HINTS_LIMIT {
            return Err(InvariantError::MaxHintsOutOfRange(max_hints).into());
        }
        let context = {
            let mut context = self.context.lock();
            context.current_offset = offset;
            context.set_max_hints(max_hints)?;
            context.clone()
        };
        Ok(self.predict_with_context(source, &context, strategies))
    }

    /// [`predict`](Self::predict) against a caller-owned context.
    pub fn predict_with_context(
        &self,
        source: &str,
        context: &SessionContext,
        strategies: Option<&[&str]>,
    ) -> Vec<Prediction> {
        let started = Instant::now();
        let index = self.index_or_load(source, 0);
        let query_key = query_fingerprint(
            context,
            index.version(),
            self.strategy_generation.load(Ordering::Acquire),
            strategies,
        );

        if let Some(cached) = self.cache.get_predictions(source, context.current_offset, &query_key) {
            self.metrics.hit();
            self.metrics.record_query(cached.len(), started.elapsed());
            debug!(source, hints = cached.len(), "predictions served from cache");
            return cached;
        }
        self.metrics.miss();

        let selected = self.select_strategies(strategies);
        if selected.is_empty() {
            warn!(source, "no active strategies");
            return Vec::new();
        }

        let mut all = Vec::new();
        for strategy in &selected {
            all.extend(run_strategy(strategy.as_ref(), context, &index));
        }

        let ranked = rank_for_context(dedupe(all), context);
        self.metrics.record_query(ranked.len(), started.elapsed());
        self.cache
            .put_predictions(source, context.current_offset, &query_key, ranked.clone());

        info!(
            source,
            offset = %format!("{:#08X}", context.current_offset),
            strategies = selected.len(),
            hints = ranked.len(),
            elapsed_ms = started.elapsed().as_secs_f64() * 1000.0,
            "generated predictions"
        );
        ranked
    }

    fn select_strategies(&self, names: Option<&[&str]>) -> Vec<Arc<dyn Strategy>> {
        let registry = self.registry.read();
        match names {
            Some(names) if !names.is_empty() => names
                .iter()
                .filter_map(|name| {
                    let strategy = registry.get(name);
                    if strategy.is_none() {
                        warn!(strategy = name, "requested strategy is not registered");
                    }
                    strategy
                })
                .collect(),
            _ => registry.enabled(),
        }
    }

    /// Feed the outcome of following `prediction` back to the strategy that
    /// produced it. Returns whether a strategy received the feedback.
    pub fn record_outcome(&self, prediction: &Prediction, found: Option<&DiscoveredObject>) -> bool {
        if found.is_some() {
            self.metrics.successful.fetch_add(1, Ordering::Relaxed);
        }
        if !self.context.lock().learning_enabled {
            return false;
        }
        let Some(strategy) = self.owner_of(prediction.strategy()) else {
            debug!(kind = %prediction.strategy(), "no strategy owns this prediction kind");
            return false;
        };
        let learned = catch_unwind(AssertUnwindSafe(|| strategy.learn(prediction, found)));
        // Learned state may change what the strategy predicts next.
        self.bump_strategy_generation();
        if learned.is_err() {
            warn!(strategy = strategy.name(), "strategy panicked while learning");
            return false;
        }
        debug!(strategy = strategy.name(), success = found.is_some(), "outcome recorded");
        true
    }

    /// Retire every cached prediction computed against the previous
    /// strategy set or strategy state.
    fn bump_strategy_generation(&self) {
        self.strategy_generation.fetch_add(1, Ordering::AcqRel);
    }

    /// First registered strategy of the kind that produces `kind`
    /// predictions. Offset-predictor output belongs to the pattern strategy.
    fn owner_of(&self, kind: StrategyKind) -> Option<Arc<dyn Strategy>> {
        let kind = match kind {
            StrategyKind::Predictive => StrategyKind::PatternBased,
            other => other,
        };
        let registry = self.registry.read();
        let names = registry.names();
        names
            .iter()
            .filter_map(|name| registry.get(name))
            .find(|s| s.kind() == kind)
    }

    /// Objects in `source` resembling `reference`, best first.
    pub fn similar_to(
        &self,
        source: &str,
        reference: &DiscoveredObject,
        max_results: usize,
    ) -> Vec<(DiscoveredObject, f64)> {
        let Some(index) = self.index(source) else {
            return Vec::new();
        };
        let mut found =
            index.with_objects(|objects| self.similarity.find_similar(reference, objects, SIMILAR_MIN_SCORE));
        found.truncate(max_results);
        found
    }

    pub fn performance_metrics(&self) -> PerformanceMetrics {
        self.metrics.snapshot()
    }

    // ── Strategies ──────────────────────────────────────────────────────

    pub fn register_strategy(&self, strategy: Arc<dyn Strategy>) {
        self.registry.write().register(strategy);
        self.bump_strategy_generation();
    }

    pub fn enable_strategy(&self, name: &str) -> Result<(), NavigatorError> {
        self.registry.write().set_enabled(name, true)?;
        self.bump_strategy_generation();
        info!(strategy = name, "strategy enabled");
        Ok(())
    }

    pub fn disable_strategy(&self, name: &str) -> Result<(), NavigatorError> {
        self.registry.write().set_enabled(name, false)?;
        self.bump_strategy_generation();
        info!(strategy = name, "strategy disabled");
        Ok(())
    }

    pub fn set_default_strategy(&self, name: &str) -> Result<(), NavigatorError> {
        self.registry.write().set_default(name)?;
        Ok(())
    }

    pub fn default_strategy(&self) -> Option<String> {
        self.registry.read().default_name().map(str::to_string)
    }

    pub fn strategy_names(&self) -> Vec<String> {
        self.registry.read().names()
    }

    pub fn enabled_strategies(&self) -> Vec<String> {
        self.registry.read().enabled_names()
    }

    pub fn strategy_stats(&self) -> Vec<(String, StrategyStats)> {
        let registry = self.registry.read();
        registry
            .names()
            .into_iter()
            .filter_map(|name| registry.get(&name).map(|s| (name, s.stats())))
            .collect()
    }

    // ── Plugins ─────────────────────────────────────────────────────────

    /// Load a plugin and register any strategies it provides.
    pub fn load_plugin(&self, factory: PluginFactory) -> bool {
        let mut plugins = self.plugins.lock();
        let name = match plugins.try_load(factory) {
            Ok(name) => name,
            Err(e) => {
                warn!(error = %e, "plugin load failed");
                return false;
            }
        };
        {
            let mut registry = self.registry.write();
            for strategy in plugins.strategies_of(&name) {
                registry.register(strategy);
            }
        }
        self.bump_strategy_generation();
        true
    }

    /// Unregister a plugin's strategies and unload it.
    pub fn unload_plugin(&self, name: &str) -> bool {
        let mut plugins = self.plugins.lock();
        let provided = plugins.strategies_of(name);
        {
            let mut registry = self.registry.write();
            for strategy in provided {
                registry.unregister(strategy.name());
            }
        }
        self.bump_strategy_generation();
        plugins.unload(name)
    }

    /// Toggle a plugin along with the strategies it registered.
    pub fn set_plugin_enabled(&self, name: &str, enabled: bool) -> bool {
        let mut plugins = self.plugins.lock();
        let toggled = if enabled {
            plugins.enable(name)
        } else {
            plugins.disable(name)
        };
        if toggled {
            let mut registry = self.registry.write();
            for strategy in plugins.strategies_of(name) {
                if let Err(e) = registry.set_enabled(strategy.name(), enabled) {
                    warn!(plugin = name, error = %e, "plugin strategy missing from registry");
                }
            }
            drop(registry);
            self.bump_strategy_generation();
        }
        toggled
    }

    pub fn plugin_metadata(&self) -> Vec<PluginMetadata> {
        self.plugins.lock().metadata()
    }

    pub fn scorer(&self, name: &str) -> Option<ScoreFn> {
        self.plugins.lock().scorers().get(name).copied()
    }

    pub fn format_adapter(&self, name: &str) -> Option<Arc<dyn BlobDecoder>> {
        self.plugins.lock().format_adapters().get(name).cloned()
    }

    // ── Session ─────────────────────────────────────────────────────────

    pub fn context(&self) -> SessionContext {
        self.context.lock().clone()
    }

    pub fn set_context(&self, context: SessionContext) {
        *self.context.lock() = context;
    }

    pub fn visit(&self, offset: u64) {
        self.context.lock().visit(offset);
    }

    pub fn reject(&self, offset: u64) {
        self.context.lock().reject(offset);
    }

    pub fn add_favorite(&self, start: u64, end: u64) -> Result<(), NavigatorError> {
        self.context.lock().add_favorite(start, end)?;
        Ok(())
    }

    // ── Persistence & lifecycle ─────────────────────────────────────────

    /// Save every index snapshot to the cache. Returns how many were saved.
    pub fn persist_all(&self) -> usize {
        let indexes: Vec<(String, Arc<SpatialIndex>)> = self
            .indexes
            .read()
            .iter()
            .map(|(source, index)| (source.clone(), Arc::clone(index)))
            .collect();
        for (source, index) in &indexes {
            self.cache.put_snapshot(source, index.snapshot());
        }
        if !indexes.is_empty() {
            debug!(sources = indexes.len(), "persisted index snapshots");
        }
        indexes.len()
    }

    /// Start cache maintenance and periodic snapshot persistence. Must be
    /// called inside a tokio runtime. A second call does nothing.
    pub fn start_maintenance(self: &Arc<Self>) {
        self.cache
            .start_maintenance(Duration::from_secs(self.config.cache.maintenance_interval_secs));

        let mut slot = self.persist_task.lock();
        if slot.is_some() {
            return;
        }
        let weak: Weak<Self> = Arc::downgrade(self);
        let period = Duration::from_secs(self.config.navigator.persist_interval_secs);
        *slot = Some(PeriodicTask::spawn("navigator-persist", period, move || {
            let Some(navigator) = weak.upgrade() else {
                return ControlFlow::Break(());
            };
            navigator.persist_all();
            ControlFlow::Continue(())
        }));
    }

    pub fn maintenance_running(&self) -> bool {
        self.persist_task.lock().as_ref().is_some_and(|t| !t.is_finished())
    }

    /// Stop background work, save every index, flush the cache, and unload
    /// plugins. Each background loop gets the configured shutdown timeout.
    pub async fn shutdown(&self) {
        let timeout = Duration::from_secs(self.config.cache.shutdown_timeout_secs);
        let task = self.persist_task.lock().take();
        if let Some(task) = task {
            task.stop(timeout).await;
        }
        let saved = self.persist_all();
        self.cache.shutdown(timeout).await;
        self.plugins.lock().shutdown_all();
        info!(saved, "navigator shut down");
    }
}

/// Registry holding the four built-in strategies, configured and enabled
/// per `config`. The hybrid strategy shares instances with the others.
fn builtin_registry(config: &AppConfig) -> Result<StrategyRegistry, RegistryError> {
    let strategies = &config.strategies;
    let linear: Arc<dyn Strategy> = Arc::new(
        SequentialStrategy::new(strategies.linear_step).with_gap_min_size(config.index.gap_min_size),
    );
    let pattern: Arc<dyn Strategy> =
        Arc::new(StatisticalStrategy::new(PatternAnalyzer::from_config(&config.intelligence)));
    let similarity_strategy = SimilarityStrategy::new();
    // Config validation keeps the threshold inside [0, 1].
    if let Err(e) = similarity_strategy.set_threshold(config.intelligence.similarity_threshold) {
        warn!(error = %e, "ignoring similarity threshold");
    }
    let similarity: Arc<dyn Strategy> = Arc::new(similarity_strategy);
    let hybrid: Arc<dyn Strategy> = Arc::new(HybridStrategy::with_components(
        Arc::clone(&linear),
        Arc::clone(&pattern),
        Arc::clone(&similarity),
        &strategies.hybrid_weights,
    ));

    let mut registry = StrategyRegistry::new();
    for strategy in [linear, pattern, similarity, hybrid] {
        registry.register(strategy);
    }
    for name in registry.names() {
        registry.set_enabled(&name, strategies.enabled.contains(&name))?;
    }
    registry.set_default(&strategies.default)?;
    Ok(registry)
}

/// Run one strategy, containing errors and panics.
fn run_strategy(strategy: &dyn Strategy, context: &SessionContext, index: &SpatialIndex) -> Vec<Prediction> {
    let name = strategy.name();
    match catch_unwind(AssertUnwindSafe(|| strategy.predict(context, index, None))) {
        Ok(Ok(predictions)) => {
            debug!(strategy = name, count = predictions.len(), "strategy returned");
            predictions
        }
        Ok(Err(e)) => {
            warn!(strategy = name, error = %e, "strategy failed");
            Vec::new()
        }
        Err(_) => {
            let e = StrategyError::Panicked(name.to_string());
            warn!(strategy = name, error = %e, "strategy failed");
            Vec::new()
        }
    }
}

/// `0` within `max` of the current offset, else the overshoot relative to
/// `max`, capped at 1.
fn distance_penalty(distance: u64, max: u64) -> f64 {
    if distance <= max || max == 0 {
        return 0.0;
    }
    ((distance - max) as f64 / max as f64).min(1.0)
}

/// Apply the session filters, score, sort, and cap.
fn rank_for_context(predictions: Vec<Prediction>, context: &SessionContext) -> Vec<Prediction> {
    let mut kept: Vec<Prediction> = predictions
        .into_iter()
        .filter(|p| !context.is_rejected(p.target_offset()))
        .filter(|p| !context.was_recently_visited(p.target_offset(), RECENT_VISIT_WINDOW))
        .filter(|p| p.confidence() >= context.min_confidence())
        .map(|mut p| {
            let distance = p.target_offset().abs_diff(context.current_offset);
            p.set_distance_penalty(distance_penalty(distance, context.max_search_distance));
            p
        })
        .collect();

    kept.sort_by(|a, b| {
        b.score()
            .total_cmp(&a.score())
            .then(b.confidence().total_cmp(&a.confidence()))
            .then(a.target_offset().cmp(&b.target_offset()))
    });
    kept.truncate(context.max_hints());
    kept
}

/// Cache-key digest of everything that changes a query's result.
fn query_fingerprint(
    context: &SessionContext,
    index_version: u64,
    strategy_generation: u64,
    strategies: Option<&[&str]>,
) -> String {
    let mut hasher = Sha256::new();
    hasher.update(context.fingerprint().as_bytes());
    hasher.update(index_version.to_le_bytes());
    hasher.update(strategy_generation.to_le_bytes());
    for name in strategies.unwrap_or_default() {
        hasher.update(name.as_bytes());
        hasher.update([0]);
    }
    hex::encode(&hasher.finalize()[..4])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plugin::StridePlugin;
    use pretty_assertions::assert_eq;

    fn test_config() -> AppConfig {
        let mut config = AppConfig::default();
        config.cache.disk_enabled = false;
        config.navigator.min_confidence = 0.0;
        config
    }

    fn navigator() -> Navigator {
        Navigator::new(test_config()).unwrap()
    }

    fn object(offset: u64) -> DiscoveredObject {
        DiscoveredObject::new(offset, 0x80, 0x100, 0.9).unwrap()
    }

    #[test]
    fn test_builtin_registry_from_config() {
        let nav = navigator();
        assert_eq!(nav.strategy_names(), vec!["linear", "pattern", "similarity", "hybrid"]);
        assert_eq!(nav.default_strategy().as_deref(), Some("linear"));
        assert_eq!(nav.enabled_strategies(), vec!["linear", "pattern", "similarity"]);

        let mut config = test_config();
        config.strategies.enabled = vec!["linear".to_string()];
        config.strategies.default = "linear".to_string();
        let nav = Navigator::new(config).unwrap();
        assert_eq!(nav.enabled_strategies(), vec!["linear"]);
    }

    #[test]
    fn test_open_source_and_report() {
        let nav = navigator();
        let index = nav.open_source("rom", 0x10_0000);
        assert!(index.is_empty());
        assert_eq!(index.blob_size(), 0x10_0000);

        assert!(nav.report_discovery("rom", object(0x1000)));
        assert!(!nav.report_discovery("rom", object(0x1000)));
        assert_eq!(nav.statistics("rom").unwrap().total_objects, 1);
        assert_eq!(nav.cache().pending_precompute(), 1);
        assert!(nav.statistics("other").is_none());
    }

    #[test]
    fn test_predict_validates_max_hints() {
        let nav = navigator();
        assert!(matches!(
            nav.predict("rom", 0, 0, None),
            Err(NavigatorError::Invariant(InvariantError::MaxHintsOutOfRange(0)))
        ));
        assert!(nav.predict("rom", 0, 101, None).is_err());
    }

    #[test]
    fn test_predict_linear_only() {
        let nav = navigator();
        nav.report_discovery("rom", object(0x8_0000));
        let predictions = nav.predict("rom", 0x1000, 5, Some(&["linear"])).unwrap();
        assert_eq!(predictions.len(), 5);
        assert_eq!(predictions[0].target_offset(), 0x1040);
        assert!(predictions.windows(2).all(|w| w[0].score() >= w[1].score()));
    }

    #[test]
    fn test_predict_filters_rejected_and_recent() {
        let nav = navigator();
        nav.report_discovery("rom", object(0x8_0000));
        nav.visit(0x1040);
        nav.reject(0x1080);
        let predictions = nav.predict("rom", 0x1000, 10, Some(&["linear"])).unwrap();
        let offsets: Vec<u64> = predictions.iter().map(|p| p.target_offset()).collect();
        assert!(!offsets.contains(&0x1040));
        assert!(!offsets.contains(&0x1080));
        assert!(offsets.contains(&0x10C0));
    }

    #[test]
    fn test_predictions_are_cached_until_discovery() {
        let nav = navigator();
        nav.report_discovery("rom", object(0x8_0000));
        let first = nav.predict("rom", 0x1000, 5, Some(&["linear"])).unwrap();
        let second = nav.predict("rom", 0x1000, 5, Some(&["linear"])).unwrap();
        assert_eq!(first, second);

        let metrics = nav.performance_metrics();
        assert_eq!(metrics.queries, 2);
        assert_eq!(metrics.total_hints_generated, 10);
        // Snapshot lookup miss on first report, prediction miss, prediction hit.
        assert_eq!(metrics.cache_hits, 1);
        assert_eq!(metrics.cache_misses, 2);

        nav.report_discovery("rom", object(0x5000));
        nav.predict("rom", 0x1000, 5, Some(&["linear"])).unwrap();
        assert_eq!(nav.performance_metrics().cache_misses, 3);
    }

    #[test]
    fn test_toggling_strategies_retires_cached_predictions() {
        let nav = navigator();
        nav.disable_strategy("similarity").unwrap();
        for i in 0..6 {
            nav.report_discovery("rom", object(0x1000 + i * 0x100));
        }
        let linear_hints = |predictions: &[Prediction]| {
            predictions
                .iter()
                .filter(|p| p.strategy() == StrategyKind::Linear)
                .count()
        };

        let before = nav.predict("rom", 0x1500, 10, None).unwrap();
        assert!(linear_hints(&before) > 0);

        nav.disable_strategy("linear").unwrap();
        let after = nav.predict("rom", 0x1500, 10, None).unwrap();
        assert_eq!(linear_hints(&after), 0);

        nav.enable_strategy("linear").unwrap();
        let restored = nav.predict("rom", 0x1500, 10, None).unwrap();
        assert_eq!(restored, before);
        assert_eq!(nav.performance_metrics().cache_hits, 0);
    }

    #[test]
    fn test_plugin_changes_retire_cached_predictions() {
        let nav = navigator();
        nav.report_discovery("rom", object(0x8_0000));
        nav.predict("rom", 0x1000, 5, None).unwrap();
        assert!(nav.load_plugin(StridePlugin::factory));
        nav.predict("rom", 0x1000, 5, None).unwrap();
        assert!(nav.set_plugin_enabled("stride", false));
        nav.predict("rom", 0x1000, 5, None).unwrap();
        // One snapshot miss plus three prediction misses.
        assert_eq!(nav.performance_metrics().cache_misses, 4);
        assert_eq!(nav.performance_metrics().cache_hits, 0);
    }

    #[test]
    fn test_learning_retires_cached_predictions() {
        let mut config = test_config();
        config.strategies.enabled = vec!["similarity".to_string()];
        config.strategies.default = "similarity".to_string();
        let nav = Navigator::new(config).unwrap();
        for i in 0..4 {
            nav.report_discovery("rom", object(0x1000 + i * 0x200));
        }

        let before = nav.predict("rom", 0x1600, 10, None).unwrap();
        assert!(before.is_empty());

        let prediction = Prediction::new(0x1000, 0.5, StrategyKind::Similarity);
        assert!(nav.record_outcome(&prediction, Some(&object(0x1000))));
        let after = nav.predict("rom", 0x1600, 10, None).unwrap();
        assert!(!after.is_empty());
        assert!(after.iter().all(|p| p.strategy() == StrategyKind::Similarity));
    }

    #[test]
    fn test_empty_index_yields_empty() {
        let nav = navigator();
        assert!(nav.predict("rom", 0x1000, 10, None).unwrap().is_empty());
    }

    #[test]
    fn test_unknown_strategy_names_yield_empty() {
        let nav = navigator();
        assert!(nav.predict("rom", 0, 5, Some(&["nope"])).unwrap().is_empty());
    }

    #[test]
    fn test_disabled_strategies_are_skipped() {
        let nav = navigator();
        for name in nav.strategy_names() {
            nav.disable_strategy(&name).unwrap();
        }
        assert!(nav.predict("rom", 0, 5, None).unwrap().is_empty());
        assert!(nav.enable_strategy("missing").is_err());
    }

    #[test]
    fn test_record_outcome_routes_by_kind() {
        let nav = navigator();
        let prediction = Prediction::new(0x40, 0.5, StrategyKind::Linear);
        assert!(nav.record_outcome(&prediction, Some(&object(0x40))));
        assert!(nav.record_outcome(&Prediction::new(0x80, 0.5, StrategyKind::Predictive), None));

        let stats: HashMap<String, StrategyStats> = nav.strategy_stats().into_iter().collect();
        assert_eq!(stats["linear"].successful_predictions, 1);
        assert_eq!(stats["pattern"].hints_generated, 1);
        assert_eq!(nav.performance_metrics().successful_navigations, 1);

        // No custom strategy registered yet.
        assert!(!nav.record_outcome(&Prediction::new(0, 0.5, StrategyKind::Custom), None));
    }

    #[test]
    fn test_learning_disabled_skips_strategies() {
        let nav = navigator();
        let mut context = nav.context();
        context.learning_enabled = false;
        nav.set_context(context);
        let prediction = Prediction::new(0x40, 0.5, StrategyKind::Linear);
        assert!(!nav.record_outcome(&prediction, Some(&object(0x40))));
        assert_eq!(nav.performance_metrics().successful_navigations, 1);
    }

    #[test]
    fn test_similar_to() {
        let nav = navigator();
        for offset in [0x1000, 0x2000, 0x3000] {
            nav.report_discovery("rom", object(offset));
        }
        nav.report_discovery("rom", DiscoveredObject::new(0x4000, 0x10, 0x1000, 0.9).unwrap());

        let found = nav.similar_to("rom", &object(0x1000), 10);
        let offsets: Vec<u64> = found.iter().map(|(o, _)| o.offset()).collect();
        assert_eq!(offsets[..2], [0x2000, 0x3000]);
        assert_eq!(nav.similar_to("rom", &object(0x1000), 1).len(), 1);
        assert!(nav.similar_to("missing", &object(0), 10).is_empty());
    }

    #[test]
    fn test_plugin_strategies_join_registry() {
        let nav = navigator();
        assert!(nav.load_plugin(StridePlugin::factory));
        assert!(nav.strategy_names().contains(&"stride".to_string()));
        assert!(nav.record_outcome(&Prediction::new(0, 0.5, StrategyKind::Custom), None));

        assert!(nav.set_plugin_enabled("stride", false));
        assert!(!nav.enabled_strategies().contains(&"stride".to_string()));

        assert!(nav.unload_plugin("stride"));
        assert!(!nav.strategy_names().contains(&"stride".to_string()));
        assert!(nav.plugin_metadata().is_empty());
    }

    #[test]
    fn test_persist_and_reload_through_cache() {
        let cache = Arc::new(TieredCache::in_memory(16));
        let nav = Navigator::with_cache(test_config(), Arc::clone(&cache)).unwrap();
        nav.report_discovery("rom", object(0x1000));
        nav.report_discovery("rom", object(0x2000));
        assert_eq!(nav.persist_all(), 1);

        let fresh = Navigator::with_cache(test_config(), cache).unwrap();
        let index = fresh.open_source("rom", 0);
        assert_eq!(index.len(), 2);
        assert_eq!(fresh.performance_metrics().cache_hits, 1);
    }

    #[test]
    fn test_analysis_tracks_index_version() {
        let nav = navigator();
        assert!(nav.analysis("rom").is_none());
        for offset in [0x1000, 0x1100, 0x1200] {
            nav.report_discovery("rom", object(offset));
        }
        let analysis = nav.analysis("rom").unwrap();
        assert_eq!(analysis.object_count, 3);
        nav.report_discovery("rom", object(0x1300));
        assert_eq!(nav.analysis("rom").unwrap().object_count, 4);
    }

    #[test]
    fn test_distance_penalty() {
        assert_eq!(distance_penalty(0x100, 0x1000), 0.0);
        assert_eq!(distance_penalty(0x1800, 0x1000), 0.5);
        assert_eq!(distance_penalty(0x10000, 0x1000), 1.0);
    }

    #[test]
    fn test_rank_for_context_orders_by_score() {
        let mut context = SessionContext::new(0);
        context.set_min_confidence(0.2).unwrap();
        context.set_max_hints(2).unwrap();
        let predictions = vec![
            Prediction::new(0x10, 0.9, StrategyKind::Linear).with_priority(0.4),
            Prediction::new(0x20, 0.6, StrategyKind::Linear).with_priority(0.8),
            Prediction::new(0x30, 0.1, StrategyKind::Linear).with_priority(1.0),
            Prediction::new(0x40, 0.5, StrategyKind::Linear).with_priority(0.5),
        ];
        let ranked = rank_for_context(predictions, &context);
        let offsets: Vec<u64> = ranked.iter().map(|p| p.target_offset()).collect();
        assert_eq!(offsets, vec![0x20, 0x10]);
    }

    #[tokio::test]
    async fn test_maintenance_lifecycle() {
        let nav = Arc::new(navigator());
        nav.report_discovery("rom", object(0x1000));
        nav.start_maintenance();
        assert!(nav.maintenance_running());
        nav.start_maintenance();

        nav.shutdown().await;
        assert!(!nav.maintenance_running());
        assert!(nav.cache().get_snapshot("rom").is_some());
    }
}
