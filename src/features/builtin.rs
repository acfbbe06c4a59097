//! Built-in trajectory features.

use super::{Column, Feature, FeatureContext, FeatureKind};
use crate::error::{Result, SmapError};
use crate::geo_utils::haversine_km;
use crate::preprocess::PointTable;

/// Velocity (km/h) at or below which a point counts as stopped.
const STOP_VELOCITY_KMH: f64 = 15.0;

/// Stops shorter than this (seconds) are congestion rather than work.
const CONGESTION_MAX_SECS: f64 = 600.0;

/// Great-circle distance (km) from a point to its successor in the same
/// trajectory. The last point of a trajectory gets 0.
#[derive(Debug, Clone, Copy, Default)]
pub struct Distance;

impl Feature for Distance {
    fn name(&self) -> &str {
        "distance"
    }

    fn kind(&self) -> FeatureKind {
        FeatureKind::Numerical
    }

    fn compute(&self, table: &PointTable, _ctx: &FeatureContext<'_>) -> Result<Column> {
        let positions = table.positions();
        let values = (0..table.len())
            .map(|i| match table.successor(i) {
                Some(next) => haversine_km(&positions[i], &positions[next]),
                None => 0.0,
            })
            .collect();
        Ok(Column::Numeric(values))
    }
}

/// Seconds from a point to its successor in the same trajectory. The last
/// point of a trajectory gets 0, so durations never leak across trajectories.
#[derive(Debug, Clone, Copy, Default)]
pub struct Duration;

impl Feature for Duration {
    fn name(&self) -> &str {
        "duration"
    }

    fn kind(&self) -> FeatureKind {
        FeatureKind::Numerical
    }

    fn compute(&self, table: &PointTable, _ctx: &FeatureContext<'_>) -> Result<Column> {
        let timestamps = table.timestamps();
        let values = (0..table.len())
            .map(|i| match table.successor(i) {
                Some(next) => (timestamps[next] - timestamps[i]).num_milliseconds() as f64 / 1000.0,
                None => 0.0,
            })
            .collect();
        Ok(Column::Numeric(values))
    }
}

/// Speed in km/h: `distance / (duration / 3600)`, or 0 for zero duration.
#[derive(Debug, Clone, Copy, Default)]
pub struct Velocity;

impl Feature for Velocity {
    fn name(&self) -> &str {
        "velocity"
    }

    fn kind(&self) -> FeatureKind {
        FeatureKind::Numerical
    }

    fn dependencies(&self) -> &[&str] {
        &["distance"]
    }

    fn compute(&self, table: &PointTable, _ctx: &FeatureContext<'_>) -> Result<Column> {
        let distance = table.numeric("distance")?;
        let duration = table.numeric("duration")?;
        let values = distance
            .iter()
            .zip(duration)
            .map(|(&d, &secs)| if secs > 0.0 { d / (secs / 3600.0) } else { 0.0 })
            .collect();
        Ok(Column::Numeric(values))
    }
}

/// How the time at a point was spent.
///
/// Slow points (`velocity <= 15`) are `congestion` when the stop is shorter
/// than ten minutes, otherwise the point's external label if it has one,
/// otherwise `work`. Faster points are `driving`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TimeUsage;

impl Feature for TimeUsage {
    fn name(&self) -> &str {
        "time usage"
    }

    fn kind(&self) -> FeatureKind {
        FeatureKind::Categorical
    }

    fn dependencies(&self) -> &[&str] {
        &["velocity"]
    }

    fn categories(&self) -> Vec<String> {
        vec!["congestion".into(), "work".into(), "driving".into()]
    }

    fn absorbs_labels(&self) -> bool {
        true
    }

    fn compute(&self, table: &PointTable, ctx: &FeatureContext<'_>) -> Result<Column> {
        let velocity = table.numeric("velocity")?;
        let duration = table.numeric("duration")?;
        if let Some(labels) = ctx.labels {
            if labels.len() != table.len() {
                return Err(SmapError::ColumnLength {
                    feature: "label".to_string(),
                    expected: table.len(),
                    actual: labels.len(),
                });
            }
        }

        let values = (0..table.len())
            .map(|i| {
                if velocity[i] > STOP_VELOCITY_KMH {
                    return "driving".to_string();
                }
                if duration[i] < CONGESTION_MAX_SECS {
                    return "congestion".to_string();
                }
                match ctx.labels.map(|l| l[i].as_str()) {
                    Some(label) if !label.is_empty() => label.to_string(),
                    _ => "work".to_string(),
                }
            })
            .collect();
        Ok(Column::Categorical(values))
    }
}
