//! Statistics over stored exchanges.
//!
//! Both the status line and the duration label are display strings, so the
//! numbers are recovered by extracting the first run of digits from each.

use regex::Regex;

use crate::error_handling::types::StorageError;
use crate::storage::types::StatsSnapshot;

pub struct StatsCalculator {
    digits: Regex,
}

impl StatsCalculator {
    pub fn new() -> Result<Self, StorageError> {
        let digits = Regex::new(r"(\d+)")
            .map_err(|e| StorageError::InvalidConfiguration(e.to_string()))?;
        Ok(Self { digits })
    }

    /// First integer found in `text`, e.g. `125` for `"125ms"` or `404` for
    /// `"404 Not Found"`.
    pub fn leading_int(&self, text: &str) -> Option<i64> {
        self.digits
            .captures(text)
            .and_then(|c| c.get(1))
            .and_then(|m| m.as_str().parse().ok())
    }

    /// Folds `(status_line, duration_label)` pairs into a snapshot.
    ///
    /// Rows with no parsable status count toward `total` only; rows with no
    /// parsable duration are left out of the average.
    pub fn compute<'a, I>(&self, rows: I) -> StatsSnapshot
    where
        I: IntoIterator<Item = (&'a str, &'a str)>,
    {
        let mut total = 0i64;
        let mut success = 0i64;
        let mut error = 0i64;
        let mut latency_sum = 0i64;
        let mut latency_count = 0i64;

        for (status, time) in rows {
            total += 1;
            match self.leading_int(status) {
                Some(code) if (200..400).contains(&code) => success += 1,
                Some(code) if code >= 400 => error += 1,
                _ => {}
            }
            if let Some(ms) = self.leading_int(time) {
                latency_sum = latency_sum.saturating_add(ms);
                latency_count += 1;
            }
        }

        let avg = if latency_count > 0 {
            latency_sum / latency_count
        } else {
            0
        };

        StatsSnapshot {
            total,
            success,
            error,
            avg_latency_label: format!("{}ms", avg),
        }
    }
}
