//! Report generation for dealgood runs
//!
//! This crate renders collector snapshots for humans:
//!
//! - A header describing the experiment before the run starts
//! - A periodic table of per-target counters and TTFB quantiles
//! - A full per-target summary and a brief one-line-per-target summary

#![warn(missing_docs)]
#![warn(clippy::all)]

mod header;
mod summary;
mod table;

pub use header::write_header;
pub use summary::{brief_lines, log_brief_summary, write_full_summary};
pub use table::TimingsTable;

/// Percentage of `part` in `whole`, zero when `whole` is zero
pub(crate) fn percent(part: u64, whole: u64) -> f64 {
    if whole == 0 {
        0.0
    } else {
        100.0 * part as f64 / whole as f64
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_percent() {
        assert_eq!(percent(1, 4), 25.0);
        assert_eq!(percent(3, 0), 0.0);
    }
}
