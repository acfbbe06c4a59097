//! Seriation of a small synthetic grid.
//!
//! Writes a 6-cell GeoJSON strip and a handful of trajectories to a scratch
//! directory, then prints the smoothed feature table and every ordering.
//!
//! Run with: cargo run --example grid_seriation

use std::fmt::Write as _;
use std::fs;

use seriation_map::{InputFiles, RegionOrder, Smap, SmapConfig, SomConfig};

const CELLS: usize = 6;
const CELL: f64 = 0.05;

fn grid_geojson() -> String {
    let features: Vec<String> = (0..CELLS)
        .map(|i| {
            let (x0, x1) = (11.0 + i as f64 * CELL, 11.0 + (i + 1) as f64 * CELL);
            let (y0, y1) = (48.0, 48.0 + CELL);
            format!(
                r#"{{"type":"Feature","properties":{{}},"geometry":{{"type":"Polygon","coordinates":[[[{x0},{y0}],[{x1},{y0}],[{x1},{y1}],[{x0},{y1}],[{x0},{y0}]]]}}}}"#
            )
        })
        .collect();
    format!(
        r#"{{"type":"FeatureCollection","features":[{}]}}"#,
        features.join(",")
    )
}

/// One trajectory per cell. Stops get longer towards the east end of the
/// strip, so the cells form a gradient from driving to work.
fn trajectories_csv() -> String {
    let mut csv = String::from("id,lat,lon,daytime\n");
    for cell in 0..CELLS {
        let lon = 11.0 + (cell as f64 + 0.5) * CELL;
        let stop_minutes = 1 + cell * 8;
        let mut minute = 0;
        for step in 0..4 {
            let lat = 48.005 + step as f64 * 0.01;
            for _ in 0..2 {
                let _ = writeln!(
                    csv,
                    "t{cell},{lat},{lon},2021-06-01 {:02}:{:02}:00",
                    8 + minute / 60,
                    minute % 60
                );
                minute += stop_minutes;
            }
        }
    }
    csv
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let dir = tempfile::tempdir()?;
    let grid = dir.path().join("grid.geojson");
    let trips = dir.path().join("trips.csv");
    fs::write(&grid, grid_geojson())?;
    fs::write(&trips, trajectories_csv())?;

    let config = SmapConfig {
        cache_dir: Some(dir.path().join("cached")),
        som: SomConfig {
            seed: Some(42),
            ..SomConfig::default()
        },
        ..SmapConfig::default()
    };
    let mut smap = Smap::new(InputFiles::new(&trips, &grid), config)?;

    println!("Grid seriation example\n");
    for radius in [0.0, 4.0] {
        let table = smap.get_feature_table(radius)?;
        println!("Feature table at {} km ({} regions):", radius, table.len());
        println!("   {}", table.columns().join(", "));
        for (i, id) in table.region_ids().iter().enumerate() {
            let row: Vec<String> = table.row(i).iter().map(|v| format!("{:.2}", v)).collect();
            println!("   region {}: {}", id, row.join(", "));
        }
        println!();
    }

    let methods: Vec<String> = smap
        .ordering_methods()
        .into_iter()
        .map(str::to_string)
        .collect();
    for method in methods {
        match smap.get_order_at(&method, 0.0) {
            Ok(RegionOrder::Permutation(order)) => println!("{:<36} order {:?}", method, order),
            Ok(RegionOrder::Clusters(labels)) => println!("{:<36} labels {:?}", method, labels),
            Err(e) => println!("{:<36} unavailable: {}", method, e),
        }
    }

    let stats = smap.stats();
    println!(
        "\n{} feature tables built, {} orderings computed",
        stats.feature_table_builds, stats.order_computations
    );
    Ok(())
}
