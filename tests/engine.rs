//! End-to-end tests of the feature engine on small scratch inputs.

mod common;

use common::{inputs, Fixture};
use seriation_map::{ColumnKind, FeatureTable, InputFiles, Smap, SmapConfig, SmapError};

fn value(table: &FeatureTable, row: usize, column: &str) -> f64 {
    let j = table.columns().iter().position(|c| c == column).unwrap();
    table.row(row)[j]
}

/// Single trajectory, three points, one region.
fn single_trip(fx: &Fixture) -> InputFiles {
    let trips = fx.trips(
        "single.csv",
        &[
            ("1", "2021-03-01 08:00:00", 50.050, 4.05),
            ("1", "2021-03-01 08:05:00", 50.051, 4.05),
            ("1", "2021-03-01 08:20:00", 50.052, 4.05),
        ],
    );
    inputs(&trips, &fx.grid("one.geojson", 1))
}

/// Trajectory `a` stops in region 0, trajectory `b` in region 1.
fn two_regions(fx: &Fixture) -> InputFiles {
    let trips = fx.trips(
        "pair.csv",
        &[
            ("a", "2021-03-01 08:00:00", 50.05, 4.05),
            ("a", "2021-03-01 08:20:00", 50.05, 4.05),
            ("a", "2021-03-01 08:25:00", 50.05, 4.05),
            ("b", "2021-03-01 09:00:00", 50.05, 4.15),
            ("b", "2021-03-01 09:05:00", 50.05, 4.15),
            ("b", "2021-03-01 09:06:00", 50.05, 4.15),
        ],
    );
    inputs(&trips, &fx.grid("two.geojson", 2))
}

#[test]
fn test_single_trajectory_without_smoothing() {
    let fx = Fixture::new();
    let mut smap = Smap::new(single_trip(&fx), fx.config()).unwrap();

    let pre = smap.pre_feature_table().clone();
    assert_eq!(pre.len(), 1);
    let row = &pre.rows()[0];
    assert_eq!((row.trajectory_id.as_str(), row.region_id), ("1", 0));
    assert_eq!(row.total, 1200.0);

    let table = smap.get_feature_table(0.0).unwrap();
    assert_eq!(table.len(), 1);
    assert_eq!(table.region_ids(), &[0]);
    for (j, kind) in pre.kinds().iter().enumerate() {
        match kind {
            ColumnKind::Numeric => assert_eq!(table.row(0)[j], row.values[j]),
            ColumnKind::Category => assert_eq!(table.row(0)[j], row.values[j] / row.total),
        }
    }

    assert_eq!(value(table, 0, "duration"), 400.0);
    assert_eq!(value(table, 0, "congestion"), 0.25);
    assert_eq!(value(table, 0, "work"), 0.75);
    assert_eq!(value(table, 0, "driving"), 0.0);
}

#[test]
fn test_smoothing_mixes_adjacent_regions() {
    let fx = Fixture::new();
    let mut smap = Smap::new(two_regions(&fx), fx.config()).unwrap();

    let plain = smap.get_feature_table(0.0).unwrap().clone();
    assert_eq!(value(&plain, 0, "work"), 0.8);
    assert_eq!(value(&plain, 1, "work"), 0.0);
    assert_eq!(value(&plain, 1, "congestion"), 1.0);

    let smooth = smap.get_feature_table(5.0).unwrap().clone();
    for row in 0..2 {
        assert!((value(&smooth, row, "work") - 0.4).abs() < 1e-12);
        assert!((value(&smooth, row, "congestion") - 0.6).abs() < 1e-12);
    }
    assert_ne!(plain.row(0), smooth.row(0));
}

#[test]
fn test_radius_caches_are_isolated() {
    let fx = Fixture::new();
    let mut smap = Smap::new(two_regions(&fx), fx.config()).unwrap();

    let first = smap.get_feature_table(0.0).unwrap().clone();
    let other = smap.get_feature_table(5.0).unwrap().clone();
    let again = smap.get_feature_table(0.0).unwrap().clone();

    assert_eq!(first, again);
    assert_ne!(first, other);
    assert_eq!(again.radius_km(), 0.0);
}

#[test]
fn test_repeated_request_is_memoised() {
    let fx = Fixture::new();
    let mut smap = Smap::new(two_regions(&fx), fx.config()).unwrap();

    smap.set_radius(2.5).unwrap();
    let first = smap.feature_table().unwrap().clone();
    let second = smap.feature_table().unwrap().clone();
    assert_eq!(first, second);
    assert_eq!(smap.stats().feature_table_builds, 1);

    smap.set_radius(0.0).unwrap();
    smap.feature_table().unwrap();
    assert_eq!(smap.stats().feature_table_builds, 2);
}

#[test]
fn test_category_proportions_sum_to_one() {
    let fx = Fixture::new();
    let mut smap = Smap::new(two_regions(&fx), fx.config()).unwrap();
    let categories: Vec<usize> = smap
        .pre_feature_table()
        .kinds()
        .iter()
        .enumerate()
        .filter(|(_, k)| **k == ColumnKind::Category)
        .map(|(j, _)| j)
        .collect();

    for radius in [0.0, 1.0, 20.0] {
        let table = smap.get_feature_table(radius).unwrap();
        for i in 0..table.len() {
            let sum: f64 = categories.iter().map(|&j| table.row(i)[j]).sum();
            assert!((sum - 1.0).abs() < 1e-9, "radius {radius}, row {i}: {sum}");
        }
    }
}

#[test]
fn test_pre_feature_cache_is_reused() {
    let fx = Fixture::new();
    let files = two_regions(&fx);

    let first = Smap::new(files.clone(), fx.config()).unwrap();
    assert_eq!(first.stats().pre_feature_builds, 1);
    let cache = first.cache_file().unwrap();
    assert!(cache.starts_with(fx.cache_dir()));
    assert!(cache.exists());

    let second = Smap::new(files, fx.config()).unwrap();
    assert_eq!(second.stats().pre_feature_builds, 0);
    assert_eq!(second.pre_feature_table(), first.pre_feature_table());
}

#[test]
fn test_disabled_cache_writes_nothing() {
    let fx = Fixture::new();
    let config = SmapConfig {
        cache_dir: None,
        ..SmapConfig::default()
    };
    let smap = Smap::new(two_regions(&fx), config).unwrap();
    assert!(smap.cache_file().is_none());
    assert!(!fx.cache_dir().exists());
}

#[test]
fn test_rebuild_clears_derived_state() {
    let fx = Fixture::new();
    let mut smap = Smap::new(two_regions(&fx), fx.config()).unwrap();
    smap.get_order("PCA").unwrap();

    smap.rebuild_pre_features().unwrap();
    smap.get_order("PCA").unwrap();

    let stats = smap.stats();
    assert_eq!(stats.pre_feature_builds, 2);
    assert_eq!(stats.order_computations, 2);
    assert_eq!(stats.order_cache_hits, 0);
}

#[test]
fn test_labels_become_categories() {
    let fx = Fixture::new();
    let trips = fx.trips(
        "labelled.csv",
        &[
            ("a", "2021-03-01 08:00:00", 50.02, 4.02),
            ("a", "2021-03-01 08:30:00", 50.02, 4.02),
            ("a", "2021-03-01 08:31:00", 50.02, 4.02),
        ],
    );
    let zones = fx.labels("zones.geojson", &[("depot", 4.0, 50.0, 0.05)]);
    let files = inputs(&trips, &fx.grid("grid.geojson", 2)).with_labels(zones);
    let mut smap = Smap::new(files, fx.config()).unwrap();

    assert!(smap.pre_feature_table().columns().iter().any(|c| c == "depot"));
    assert_eq!(
        smap.feature_registry().categories("time usage").unwrap().last().unwrap(),
        "depot"
    );
    let table = smap.get_feature_table(0.0).unwrap();
    // 30 minute stop in the depot, then a one minute stop
    assert!((value(table, 0, "depot") - 30.0 / 31.0).abs() < 1e-12);
    assert_eq!(value(table, 1, "depot"), 0.0);
}

#[test]
fn test_unknown_method_is_rejected() {
    let fx = Fixture::new();
    let mut smap = Smap::new(two_regions(&fx), fx.config()).unwrap();
    let err = smap.get_order("Spectral Seriation").unwrap_err();
    assert!(matches!(err, SmapError::UnknownMethod(ref m) if m == "Spectral Seriation"));
    assert!(err.is_configuration());
}

#[test]
fn test_missing_trajectory_file_fails() {
    let fx = Fixture::new();
    let files = inputs(&fx.path("absent.csv"), &fx.grid("grid.geojson", 1));
    assert!(matches!(
        Smap::new(files, fx.config()),
        Err(SmapError::Io { .. })
    ));
}

#[test]
fn test_projected_regions_fail() {
    let fx = Fixture::new();
    let trips = fx.trips("t.csv", &[("1", "2021-03-01 08:00:00", 50.0, 4.0)]);
    let grid = fx.write(
        "bng.geojson",
        r#"{"type":"FeatureCollection","features":[{"type":"Feature","properties":{},
            "geometry":{"type":"Polygon","coordinates":[[[530000,180000],[531000,180000],[531000,181000],[530000,180000]]]}}]}"#,
    );
    assert!(matches!(
        Smap::new(inputs(&trips, &grid), fx.config()),
        Err(SmapError::InvalidCrs(_))
    ));
}

#[test]
fn test_negative_radius_rejected() {
    let fx = Fixture::new();
    let mut smap = Smap::new(two_regions(&fx), fx.config()).unwrap();
    assert!(matches!(smap.set_radius(-1.0), Err(SmapError::InvalidConfig(_))));
    assert!(smap.get_feature_table(f64::NAN).is_err());
    assert_eq!(smap.radius(), 0.0);
}
