//! Runtime and cost bookkeeping across incarnations.

use chrono::{DateTime, TimeDelta, Utc};

/// Price and time span of one archived incarnation.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct CostRecord {
    /// Hourly price of the incarnation.
    pub price: f64,
    /// When the incarnation became available, if it ever did.
    pub start: Option<DateTime<Utc>>,
    /// When the incarnation was released, if recorded.
    pub stop: Option<DateTime<Utc>>,
}

impl CostRecord {
    /// Elapsed time of the incarnation. A missing bound counts as the Unix
    /// epoch.
    #[must_use]
    pub fn runtime(&self) -> TimeDelta {
        bound(self.stop) - bound(self.start)
    }

    /// Cost of the incarnation in price units.
    #[must_use]
    pub fn cost(&self) -> f64 {
        cost_of(self.runtime(), self.price)
    }
}

fn bound(value: Option<DateTime<Utc>>) -> DateTime<Utc> {
    value.unwrap_or(DateTime::UNIX_EPOCH)
}

/// Elapsed time of the live incarnation at `now`.
///
/// A stop time earlier than the start belongs to a previous incarnation and
/// is ignored.
#[must_use]
pub fn live_runtime(
    start: Option<DateTime<Utc>>,
    stop: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
) -> TimeDelta {
    start.map_or(TimeDelta::zero(), |started| {
        let ended = stop.filter(|stopped| *stopped >= started).unwrap_or(now);
        ended - started
    })
}

/// Total runtime of the archived incarnations.
#[must_use]
pub fn history_runtime(history: &[CostRecord]) -> TimeDelta {
    history
        .iter()
        .map(CostRecord::runtime)
        .fold(TimeDelta::zero(), |total, span| total + span)
}

/// Total cost of the archived incarnations.
#[must_use]
pub fn history_cost(history: &[CostRecord]) -> f64 {
    history.iter().map(CostRecord::cost).sum()
}

/// Converts a span at an hourly price into a cost.
#[must_use]
#[expect(
    clippy::float_arithmetic,
    clippy::cast_precision_loss,
    reason = "cost is reported as a fractional price; millisecond counts stay far below 2^52"
)]
pub fn cost_of(span: TimeDelta, hourly_price: f64) -> f64 {
    let hours = span.num_milliseconds() as f64 / 3_600_000.0;
    hours * hourly_price
}
