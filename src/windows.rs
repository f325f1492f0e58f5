// 📅 Window Sequence - Calendar periods in epoch milliseconds
//
// Windows are half-open [start_ms, end_ms), generated on calendar-month
// boundaries from start_year-01-01 through the end of end_year. Quarterly
// windows get the "Q{q}_{year}" label used throughout the output files;
// other period lengths fall back to a start-month label.

use crate::config::PipelineConfig;
use crate::error::{PipelineError, Result};
use chrono::{NaiveDate, TimeZone, Utc};
use serde::{Deserialize, Serialize};

/// One snapshot period. `index` is the period number used for lag arithmetic.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Window {
    pub index: usize,
    pub start_ms: i64,
    pub end_ms: i64,
    pub label: String,
}

impl Window {
    pub fn contains_ms(&self, ts_ms: i64) -> bool {
        self.start_ms <= ts_ms && ts_ms < self.end_ms
    }
}

fn month_start_ms(year: i32, month: u32) -> Result<i64> {
    let date = NaiveDate::from_ymd_opt(year, month, 1)
        .ok_or_else(|| PipelineError::config(format!("invalid calendar month {}-{}", year, month)))?;
    let dt = Utc.from_utc_datetime(&date.and_hms_opt(0, 0, 0).expect("midnight exists"));
    Ok(dt.timestamp_millis())
}

/// Step (year, month) forward by `months`, 1-based months.
fn add_months(year: i32, month: u32, months: u32) -> (i32, u32) {
    let zero_based = (month - 1) + months;
    (year + (zero_based / 12) as i32, (zero_based % 12) + 1)
}

fn window_label(year: i32, month: u32, window_months: u32) -> String {
    if window_months == 3 && (month - 1) % 3 == 0 {
        format!("Q{}_{}", (month - 1) / 3 + 1, year)
    } else {
        format!("W{}_{:02}", year, month)
    }
}

/// Generate the full window sequence for the configured horizon.
pub fn generate_windows(config: &PipelineConfig) -> Result<Vec<Window>> {
    config.validate()?;

    let horizon_end_ms = month_start_ms(config.end_year + 1, 1)?;

    let mut windows = Vec::new();
    let (mut year, mut month) = (config.start_year, 1u32);
    let mut index = 0usize;

    loop {
        let start_ms = month_start_ms(year, month)?;
        if start_ms >= horizon_end_ms {
            break;
        }
        let (end_year, end_month) = add_months(year, month, config.window_months);
        let end_ms = month_start_ms(end_year, end_month)?;

        windows.push(Window {
            index,
            start_ms,
            end_ms,
            label: window_label(year, month, config.window_months),
        });

        index += 1;
        (year, month) = (end_year, end_month);
    }

    Ok(windows)
}

/// Find the period whose window contains the given timestamp.
pub fn period_of(windows: &[Window], ts_ms: i64) -> Option<usize> {
    // Windows are contiguous and sorted; binary search on start_ms.
    let idx = windows.partition_point(|w| w.start_ms <= ts_ms);
    if idx == 0 {
        return None;
    }
    let w = &windows[idx - 1];
    w.contains_ms(ts_ms).then_some(w.index)
}
