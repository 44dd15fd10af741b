use chrono::{DateTime, Local};
use std::time::Duration;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Freshness {
    Fresh,
    /// One of the sources has not delivered a single value yet.
    Missing,
    /// Inverter and grid readings are too far apart to be combined.
    Skewed { gap: Duration },
    /// Both readings agree with each other but are left over from earlier cycles.
    Stale { age: Duration },
}

impl Freshness {
    pub fn is_fresh(&self) -> bool {
        matches!(self, Freshness::Fresh)
    }
}

/// Inverter and grid readings may only be combined while they are less than
/// half a recheck interval apart from each other and from the current cycle.
pub fn assess(
    inverter_at: Option<DateTime<Local>>,
    grid_at: Option<DateTime<Local>>,
    now: DateTime<Local>,
    recheck_interval: Duration,
) -> Freshness {
    let (Some(inverter_at), Some(grid_at)) = (inverter_at, grid_at) else {
        return Freshness::Missing;
    };
    let limit = recheck_interval / 2;

    let gap = distance(inverter_at, grid_at);
    if gap >= limit {
        return Freshness::Skewed { gap };
    }

    let age = distance(now, inverter_at.min(grid_at));
    if age >= limit {
        return Freshness::Stale { age };
    }

    Freshness::Fresh
}

fn distance(a: DateTime<Local>, b: DateTime<Local>) -> Duration {
    let delta = if a > b { a - b } else { b - a };
    delta.to_std().unwrap_or(Duration::MAX)
}
