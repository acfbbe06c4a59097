//! # Feature Engine
//!
//! [`Smap`] is the single owner of the pipeline state: the region indexes,
//! the pre-feature table, the feature table of the last requested radius and
//! every computed ordering. It is built once from validated inputs and then
//! passed to whoever needs it; nothing else mutates these tables.
//!
//! ## Caching
//!
//! - The pre-feature table is read from `cache_dir` when a file for the same
//!   inputs and feature set exists, and written there after a build.
//! - The feature table is memoised for the last requested radius only.
//!   Asking for another radius rebuilds it from the pre-feature table.
//! - Orderings are cached per method and radius and never evicted.
//!
//! All caches are mutated through `&mut self`; wrap the engine in a `Mutex`
//! to share it between threads.

use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Instant;

use log::{debug, info};

use crate::aggregate::{build_pre_features, cache_key, PreFeatureTable};
use crate::config::{validate_radius, InputFiles, SmapConfig};
use crate::error::{Result, SmapError};
use crate::features::FeatureRegistry;
use crate::io;
use crate::neighborhood::{aggregate_features, FeatureTable, NeighborhoodIndex};
use crate::ordering::{OrderingRegistry, RegionOrder};
use crate::preprocess::{preprocess, RegionIndex};
use crate::Region;

/// Counters that make the engine's memoisation observable.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EngineStats {
    /// Pre-feature tables built from the trajectory file
    pub pre_feature_builds: u64,
    /// Feature tables aggregated from the pre-feature table
    pub feature_table_builds: u64,
    /// Orderings computed by a method
    pub order_computations: u64,
    /// Orderings served from the cache
    pub order_cache_hits: u64,
}

/// The feature engine.
pub struct Smap {
    inputs: InputFiles,
    config: SmapConfig,
    features: FeatureRegistry,
    orderings: OrderingRegistry,
    regions: RegionIndex,
    labels: Option<RegionIndex>,
    neighborhood: NeighborhoodIndex,
    pre_features: PreFeatureTable,
    radius_km: f64,
    feature_table: Option<FeatureTable>,
    /// method name -> radius bits -> order
    orders: HashMap<String, HashMap<u64, RegionOrder>>,
    stats: EngineStats,
}

impl std::fmt::Debug for Smap {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Smap")
            .field("inputs", &self.inputs)
            .field("regions", &self.regions.len())
            .field("pre_features", &self.pre_features.len())
            .field("radius_km", &self.radius_km)
            .field("stats", &self.stats)
            .finish()
    }
}

impl Smap {
    /// Build an engine with the built-in features and ordering methods.
    pub fn new(inputs: InputFiles, config: SmapConfig) -> Result<Self> {
        let orderings = OrderingRegistry::with_defaults(&config);
        Self::with_registries(inputs, config, FeatureRegistry::with_defaults(), orderings)
    }

    /// Build an engine with custom feature and ordering registries.
    ///
    /// Fails when an input file is unreadable, a region file is not in
    /// geographic coordinates, or the feature dependencies do not resolve.
    pub fn with_registries(
        inputs: InputFiles,
        config: SmapConfig,
        mut features: FeatureRegistry,
        orderings: OrderingRegistry,
    ) -> Result<Self> {
        let start = Instant::now();
        config.validate()?;
        features.resolve()?;
        std::fs::metadata(&inputs.trajectories).map_err(|e| SmapError::io(&inputs.trajectories, e))?;

        let regions = RegionIndex::new(io::read_regions(&inputs.regions)?);
        let labels = match &inputs.labels {
            Some(path) => Some(RegionIndex::new(io::read_labeled_regions(path)?)),
            None => None,
        };
        let neighborhood = NeighborhoodIndex::new(regions.regions())?;

        let mut engine = Self {
            radius_km: normalize_radius(config.radius_km),
            inputs,
            config,
            features,
            orderings,
            regions,
            labels,
            neighborhood,
            pre_features: PreFeatureTable::new(Vec::new(), Vec::new())?,
            feature_table: None,
            orders: HashMap::new(),
            stats: EngineStats::default(),
        };

        let cached = match engine.cache_file() {
            Some(path) => PreFeatureTable::load(&path, &mut engine.features)?,
            None => None,
        };
        match cached {
            Some(table) => engine.pre_features = table,
            None => engine.rebuild_pre_features()?,
        }

        info!(
            "[Smap] Ready: {} regions, {} pre-feature rows, {} columns in {:?}",
            engine.regions.len(),
            engine.pre_features.len(),
            engine.pre_features.columns().len(),
            start.elapsed()
        );
        Ok(engine)
    }

    /// Path of the pre-feature cache file, if the disk cache is enabled.
    pub fn cache_file(&self) -> Option<PathBuf> {
        self.config
            .cache_dir
            .as_ref()
            .map(|dir| dir.join(cache_key(&self.inputs, &self.features)))
    }

    /// Recompute the pre-feature table from the trajectory file and rewrite
    /// the cache. Drops every derived table and ordering.
    pub fn rebuild_pre_features(&mut self) -> Result<()> {
        let start = Instant::now();
        let points = io::read_trajectories(&self.inputs.trajectories, &self.config.fields)?;
        let table = preprocess(points, &self.regions, self.labels.as_ref(), &mut self.features)?;
        self.pre_features = build_pre_features(&table, &self.features)?;
        self.stats.pre_feature_builds += 1;

        if let Some(path) = self.cache_file() {
            self.pre_features.save(&path)?;
            info!("[Smap] Cached pre-features at {}", path.display());
        }

        self.feature_table = None;
        self.orders.clear();
        debug!("[Smap] Pre-features rebuilt in {:?}", start.elapsed());
        Ok(())
    }

    /// Current smoothing radius in kilometres.
    pub fn radius(&self) -> f64 {
        self.radius_km
    }

    /// Change the smoothing radius used by [`feature_table`](Self::feature_table)
    /// and [`get_order`](Self::get_order).
    pub fn set_radius(&mut self, radius_km: f64) -> Result<()> {
        validate_radius(radius_km)?;
        self.radius_km = normalize_radius(radius_km);
        Ok(())
    }

    /// Feature table at the current radius.
    pub fn feature_table(&mut self) -> Result<&FeatureTable> {
        self.get_feature_table(self.radius_km)
    }

    /// Feature table at `radius_km`.
    ///
    /// Returns the memoised table when `radius_km` is the last requested
    /// radius; otherwise rebuilds it and replaces the memo.
    pub fn get_feature_table(&mut self, radius_km: f64) -> Result<&FeatureTable> {
        validate_radius(radius_km)?;
        let radius_km = normalize_radius(radius_km);

        let stale = match &self.feature_table {
            Some(table) => table.radius_km().to_bits() != radius_km.to_bits(),
            None => true,
        };
        if stale {
            let neighbors = self.neighborhood.neighbors(radius_km);
            let table = aggregate_features(
                &self.pre_features,
                self.neighborhood.region_ids(),
                &neighbors,
                radius_km,
            );
            self.stats.feature_table_builds += 1;
            self.feature_table = Some(table);
        } else {
            debug!("[Smap] Feature table for radius {} km is memoised", radius_km);
        }

        self.feature_table
            .as_ref()
            .ok_or_else(|| SmapError::InvalidConfig("feature table unavailable".to_string()))
    }

    /// Ordering of the regions by `method` at the current radius.
    pub fn get_order(&mut self, method: &str) -> Result<RegionOrder> {
        self.get_order_at(method, self.radius_km)
    }

    /// Ordering of the regions by `method` at `radius_km`.
    ///
    /// Orderings are cached per (method, radius). Fails with
    /// [`SmapError::UnknownMethod`] for an unregistered name.
    pub fn get_order_at(&mut self, method: &str, radius_km: f64) -> Result<RegionOrder> {
        self.orderings.get(method)?;
        validate_radius(radius_km)?;
        let radius_km = normalize_radius(radius_km);
        let key = radius_km.to_bits();

        if let Some(order) = self.orders.get(method).and_then(|m| m.get(&key)) {
            self.stats.order_cache_hits += 1;
            debug!("[Smap] `{}` at {} km served from cache", method, radius_km);
            return Ok(order.clone());
        }

        let start = Instant::now();
        self.get_feature_table(radius_km)?;
        let Some(table) = self.feature_table.as_ref() else {
            return Err(SmapError::InvalidConfig("feature table unavailable".to_string()));
        };
        let order = self.orderings.get(method)?.order(table)?;
        self.stats.order_computations += 1;
        info!(
            "[Smap] `{}` ordered {} regions at {} km in {:?}",
            method,
            order.len(),
            radius_km,
            start.elapsed()
        );

        self.orders
            .entry(method.to_string())
            .or_default()
            .insert(key, order.clone());
        Ok(order)
    }

    /// Whether `method` returns cluster labels instead of a permutation.
    pub fn is_clustering(&self, method: &str) -> Result<bool> {
        Ok(self.orderings.get(method)?.is_clustering())
    }

    /// Names of the registered ordering methods.
    pub fn ordering_methods(&self) -> Vec<&str> {
        self.orderings.names()
    }

    pub fn regions(&self) -> &[Region] {
        self.regions.regions()
    }

    pub fn pre_feature_table(&self) -> &PreFeatureTable {
        &self.pre_features
    }

    pub fn feature_registry(&self) -> &FeatureRegistry {
        &self.features
    }

    pub fn config(&self) -> &SmapConfig {
        &self.config
    }

    pub fn inputs(&self) -> &InputFiles {
        &self.inputs
    }

    pub fn stats(&self) -> EngineStats {
        self.stats
    }
}

/// Map `-0.0` to `0.0` so both share cache entries.
fn normalize_radius(radius_km: f64) -> f64 {
    radius_km + 0.0
}
