//! Ordering methods driven through the engine.

mod common;

use std::path::PathBuf;

use common::{inputs, Fixture};
use seriation_map::{
    adjacent_distances, InputFiles, RegionOrder, Smap, SmapConfig, SmapError, SolverConfig,
    SomConfig, DEFAULT_METHOD,
};

/// Four cells with different mixes of work, congestion and driving.
fn four_regions(fx: &Fixture) -> InputFiles {
    let trips = fx.trips(
        "four.csv",
        &[
            // Long stop in cell 0
            ("a", "2021-03-01 08:00:00", 50.05, 4.05),
            ("a", "2021-03-01 09:00:00", 50.05, 4.05),
            ("a", "2021-03-01 09:01:00", 50.05, 4.05),
            // Short stops in cell 1
            ("b", "2021-03-01 08:00:00", 50.05, 4.15),
            ("b", "2021-03-01 08:04:00", 50.05, 4.15),
            ("b", "2021-03-01 08:08:00", 50.05, 4.15),
            // Mixed in cell 2
            ("c", "2021-03-01 10:00:00", 50.05, 4.25),
            ("c", "2021-03-01 10:15:00", 50.05, 4.25),
            ("c", "2021-03-01 10:20:00", 50.05, 4.25),
            // Driving through cell 3
            ("d", "2021-03-01 11:00:00", 50.02, 4.35),
            ("d", "2021-03-01 11:01:00", 50.08, 4.35),
            ("d", "2021-03-01 11:02:00", 50.02, 4.36),
        ],
    );
    inputs(&trips, &fx.grid("four.geojson", 4))
}

fn engine(fx: &Fixture, config: SmapConfig) -> Smap {
    Smap::new(four_regions(fx), config).unwrap()
}

#[test]
fn test_every_method_orders_every_region() {
    let fx = Fixture::new();
    let config = SmapConfig {
        som: SomConfig {
            seed: Some(11),
            ..SomConfig::default()
        },
        ..fx.config()
    };
    let mut smap = engine(&fx, config);
    let methods: Vec<String> = smap
        .ordering_methods()
        .into_iter()
        .filter(|m| *m != "TSP based Seriation")
        .map(str::to_string)
        .collect();

    for method in methods {
        let order = smap.get_order(&method).unwrap();
        assert_eq!(order.len(), 4, "{method}");
        match order {
            RegionOrder::Permutation(ref p) => {
                let mut sorted = p.clone();
                sorted.sort_unstable();
                assert_eq!(sorted, vec![0, 1, 2, 3], "{method}");
                assert!(!smap.is_clustering(&method).unwrap());
            }
            RegionOrder::Clusters(ref labels) => {
                assert!(labels.iter().all(|&l| l < 20), "{method}");
                assert!(smap.is_clustering(&method).unwrap());
            }
        }
    }
}

#[test]
fn test_orders_are_cached_per_method_and_radius() {
    let fx = Fixture::new();
    let mut smap = engine(&fx, fx.config());

    let first = smap.get_order(DEFAULT_METHOD).unwrap();
    let again = smap.get_order(DEFAULT_METHOD).unwrap();
    assert_eq!(first, again);
    assert_eq!(smap.stats().order_computations, 1);
    assert_eq!(smap.stats().order_cache_hits, 1);

    smap.set_radius(3.0).unwrap();
    smap.get_order(DEFAULT_METHOD).unwrap();
    assert_eq!(smap.stats().order_computations, 2);

    // The first radius is still cached
    smap.set_radius(0.0).unwrap();
    assert_eq!(smap.get_order(DEFAULT_METHOD).unwrap(), first);
    assert_eq!(smap.stats().order_computations, 2);
    assert_eq!(smap.stats().order_cache_hits, 2);
}

#[test]
fn test_missing_solver_is_reported() {
    let fx = Fixture::new();
    let config = SmapConfig {
        solver: SolverConfig {
            binary: Some(PathBuf::from("/nonexistent/solvers/concorde")),
            ..SolverConfig::default()
        },
        ..fx.config()
    };
    let mut smap = engine(&fx, config);

    let err = smap.get_order("TSP based Seriation").unwrap_err();
    assert!(matches!(err, SmapError::SolverNotFound(_)));
    assert!(err.is_external());

    // A failed solve caches nothing
    assert_eq!(smap.stats().order_computations, 0);
    assert!(smap.get_order("TSP based Seriation").is_err());
}

#[test]
fn test_missing_solver_is_reported_for_two_regions() {
    let fx = Fixture::new();
    let trips = fx.trips(
        "pair.csv",
        &[
            ("a", "2021-03-01 08:00:00", 50.05, 4.05),
            ("a", "2021-03-01 08:20:00", 50.05, 4.05),
            ("b", "2021-03-01 09:00:00", 50.05, 4.15),
            ("b", "2021-03-01 09:05:00", 50.05, 4.15),
        ],
    );
    let config = SmapConfig {
        solver: SolverConfig {
            binary: Some(PathBuf::from("/nonexistent/solvers/concorde")),
            ..SolverConfig::default()
        },
        ..fx.config()
    };
    let mut smap = Smap::new(inputs(&trips, &fx.grid("pair.geojson", 2)), config).unwrap();

    assert!(matches!(
        smap.get_order("TSP based Seriation"),
        Err(SmapError::SolverNotFound(_))
    ));
    // The in-process heuristic still orders both regions
    assert_eq!(smap.get_order("TSP based Seriation (heuristic)").unwrap().len(), 2);
}

#[test]
fn test_seeded_som_is_reproducible() {
    let config = |fx: &Fixture| SmapConfig {
        som: SomConfig {
            seed: Some(5),
            ..SomConfig::default()
        },
        ..fx.config()
    };
    let fx = Fixture::new();
    let a = engine(&fx, config(&fx)).get_order("Self-Organizing Maps").unwrap();
    let fx = Fixture::new();
    let b = engine(&fx, config(&fx)).get_order("Self-Organizing Maps").unwrap();
    assert_eq!(a, b);
    assert!(a.is_clustering());
}

#[test]
fn test_ranks_and_adjacent_distances() {
    let fx = Fixture::new();
    let mut smap = engine(&fx, fx.config());
    let order = smap.get_order("TSP based Seriation (heuristic)").unwrap();
    let table = smap.feature_table().unwrap().clone();

    let ranks = order.ranks();
    for (position, &row) in order.as_slice().iter().enumerate() {
        assert_eq!(ranks[row], position);
    }

    let gaps = adjacent_distances(&table, order.as_slice());
    assert_eq!(gaps.len(), 3);
    assert!(gaps.iter().all(|g| g.is_finite() && *g >= 0.0));
}
