use std::io::{self, Write};
use std::time::Duration;

use dealgood_core::{Experiment, Snapshot};

const COLUMNS: [&str; 9] = [
    "time",
    "target",
    "requests",
    "conn errs",
    "dropped",
    "5xx errs",
    "TTFB P50",
    "TTFB P90",
    "TTFB P99",
];

/// Fixed-width table printed while a run is in progress.
///
/// One row per target and tick; TTFB columns are in milliseconds.
#[derive(Debug, Default)]
pub struct TimingsTable {
    header_written: bool,
}

impl TimingsTable {
    /// A table that prints its column header before the first rows
    pub fn new() -> Self {
        Self::default()
    }

    /// Write the column header
    pub fn write_header<W: Write>(&mut self, w: &mut W) -> io::Result<()> {
        writeln!(
            w,
            "{:>5} | {:>12} | {:>9} | {:>9} | {:>9} | {:>9} | {:>9} | {:>9} | {:>9}",
            COLUMNS[0],
            COLUMNS[1],
            COLUMNS[2],
            COLUMNS[3],
            COLUMNS[4],
            COLUMNS[5],
            COLUMNS[6],
            COLUMNS[7],
            COLUMNS[8]
        )?;
        self.header_written = true;
        Ok(())
    }

    /// Write one row per target present in the snapshot, in experiment order
    pub fn write_rows<W: Write>(
        &mut self,
        w: &mut W,
        elapsed: Duration,
        exp: &Experiment,
        snapshot: &Snapshot,
    ) -> io::Result<()> {
        if !self.header_written {
            self.write_header(w)?;
        }
        for target in &exp.targets {
            let Some(st) = snapshot.get(target.name()) else {
                continue;
            };
            writeln!(
                w,
                "{:>5} | {:>12} | {:>9} | {:>9} | {:>9} | {:>9} | {:>9.3} | {:>9.3} | {:>9.3}",
                elapsed.as_secs(),
                target.name(),
                st.total_requests,
                st.total_connect_errors,
                st.total_dropped,
                st.total_http_5xx,
                st.ttfb.p50 * 1000.0,
                st.ttfb.p90 * 1000.0,
                st.ttfb.p99 * 1000.0,
            )?;
        }
        w.flush()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures;

    #[test]
    fn test_rows_follow_header() {
        let exp = fixtures::experiment();
        let snapshot = fixtures::snapshot();
        let mut table = TimingsTable::new();
        let mut out = Vec::new();

        table
            .write_rows(&mut out, Duration::from_secs(300), &exp, &snapshot)
            .unwrap();
        table
            .write_rows(&mut out, Duration::from_secs(600), &exp, &snapshot)
            .unwrap();
        let text = String::from_utf8(out).unwrap();
        let lines: Vec<_> = text.lines().collect();

        assert_eq!(lines.len(), 3);
        assert!(lines[0].contains("TTFB P99"));
        let cells: Vec<_> = lines[1].split('|').map(str::trim).collect();
        assert_eq!(
            cells,
            ["300", "current", "200", "5", "10", "10", "50.000", "100.000", "150.000"]
        );
        assert!(lines[2].starts_with("  600"));
    }

    #[test]
    fn test_missing_targets_skipped() {
        let exp = fixtures::experiment();
        let mut table = TimingsTable::new();
        let mut out = Vec::new();
        table.write_header(&mut out).unwrap();
        table
            .write_rows(&mut out, Duration::from_secs(1), &exp, &Snapshot::new())
            .unwrap();
        assert_eq!(String::from_utf8(out).unwrap().lines().count(), 1);
    }
}
