use chrono::{DateTime, TimeZone, Timelike};

use crate::merge::series_for;
use crate::model::{Metric, Series, Snapshot, StatsDocument, TimePoint};

const DAY_SECS: i64 = 86_400;
const MIN_GAP_SECS: i64 = 8 * 3600;

/// Start of the calendar day containing `t` in `tz`, as seconds since the epoch.
fn day_start<Tz: TimeZone>(t: i64, tz: &Tz) -> (chrono::NaiveDate, i64) {
    let local = DateTime::from_timestamp(t, 0)
        .unwrap_or_default()
        .with_timezone(tz);
    (local.date_naive(), t - i64::from(local.num_seconds_from_midnight()))
}

/// Turn a cumulative series into per-day increments.
///
/// Deltas are summed until the calendar day changes. A change of `d` days emits `d` points
/// one day apart, each carrying `sum / d` (truncated), and restarts the sum from the newer
/// value. The running day is flushed at the end even though it is incomplete.
pub fn daily_increment<Tz: TimeZone>(series: &[TimePoint], tz: &Tz) -> Series {
    let Some(first) = series.first() else {
        return Vec::new();
    };

    let mut out = Vec::new();
    let (mut day, mut anchor) = day_start(first.t, tz);
    let mut last = first.y;
    let mut acc = 0i64;

    for p in &series[1..] {
        let (date, start) = day_start(p.t, tz);
        let days = (date - day).num_days();

        acc += p.y - last;
        last = p.y;

        if days >= 1 {
            let per_day = acc / days;
            out.extend((0..days).map(|i| TimePoint {
                t: anchor + i * DAY_SECS,
                y: per_day,
            }));
            acc = 0;
            day = date;
            anchor = start;
        }
    }

    out.push(TimePoint { t: anchor, y: acc });
    out
}

/// Thin a series to points at least eight hours apart, counting back from the newest point,
/// which is always kept as is.
pub fn decimate(series: &[TimePoint]) -> Series {
    let Some(&newest) = series.last() else {
        return Vec::new();
    };

    let mut kept = vec![newest];
    let mut last_t = newest.t;
    for p in series.iter().rev().skip(1) {
        if last_t - p.t >= MIN_GAP_SECS {
            kept.push(*p);
            last_t = p.t;
        }
    }
    kept.reverse();
    kept
}

/// Build the chart document from a merged history.
pub fn aggregate<Tz: TimeZone>(snapshots: &[Snapshot], tz: &Tz, now: i64) -> StatsDocument {
    let money = series_for(snapshots, Metric::Money);
    let money_inc = daily_increment(&money, tz);

    StatsDocument {
        timestamp: now,
        money: decimate(&money),
        money_inc: decimate(&money_inc),
        completed: decimate(&series_for(snapshots, Metric::Completed)),
        inprogress: decimate(&series_for(snapshots, Metric::InProgress)),
        free: decimate(&series_for(snapshots, Metric::Free)),
    }
}
