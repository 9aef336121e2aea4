use std::io::{self, Write};

use dealgood_core::{Experiment, MetricSample, MetricValues, Snapshot};

use crate::percent;

/// Requests that reached the target, including those that later timed out
fn connected(st: &MetricSample) -> u64 {
    st.total_requests
        .saturating_sub(st.total_connect_errors)
        .saturating_sub(st.total_dropped)
}

/// Write the detailed end-of-run summary for every target
pub fn write_full_summary<W: Write>(w: &mut W, exp: &Experiment, snapshot: &Snapshot) -> io::Result<()> {
    for (i, target) in exp.targets.iter().enumerate() {
        if i > 0 {
            writeln!(w)?;
        }
        writeln!(w, "Target:  {}", target.name())?;
        writeln!(w, "Base URL: {}", target.base_url())?;
        writeln!(w, "------------------------------")?;

        let Some(st) = snapshot.get(target.name()) else {
            writeln!(w, "no metrics available")?;
            continue;
        };
        let total = st.total_requests;
        let conn = connected(st);

        writeln!(w, "Issued:          {total:>9}")?;
        counted(w, "Connect Errors:  ", st.total_connect_errors, total)?;
        counted(w, "Timeout Errors:  ", st.total_timeout_errors, total)?;
        counted(w, "Dropped:         ", st.total_dropped, total)?;
        counted(w, "Connected:       ", conn, total)?;
        writeln!(w)?;
        counted(w, "HTTP 2XX Responses: ", st.total_http_2xx, conn)?;
        counted(w, "HTTP 3XX Responses: ", st.total_http_3xx, conn)?;
        counted(w, "HTTP 4XX Responses: ", st.total_http_4xx, conn)?;
        counted(w, "HTTP 5XX Responses: ", st.total_http_5xx, conn)?;
        if st.total_http_other > 0 {
            counted(w, "Other Responses:    ", st.total_http_other, conn)?;
        }
        writeln!(w)?;
        timing(w, "Time to connect", &st.connect_time)?;
        writeln!(w)?;
        timing(w, "Time to first byte", &st.ttfb)?;
        writeln!(w)?;
        timing(w, "Total request time", &st.total_time)?;
    }
    w.flush()
}

fn counted<W: Write>(w: &mut W, label: &str, count: u64, whole: u64) -> io::Result<()> {
    writeln!(w, "{label}{count:>9} ({:>6.2}%)", percent(count, whole))
}

fn timing<W: Write>(w: &mut W, title: &str, v: &MetricValues) -> io::Result<()> {
    writeln!(w, "{title}")?;
    for (label, secs) in [
        ("Mean:", v.mean),
        ("Min: ", v.min),
        ("Max: ", v.max),
        ("P50: ", v.p50),
        ("P90: ", v.p90),
        ("P95: ", v.p95),
        ("P99: ", v.p99),
    ] {
        writeln!(w, "  {label} {:>9.3}ms", secs * 1000.0)?;
    }
    Ok(())
}

/// One line per target with the headline numbers
pub fn brief_lines(exp: &Experiment, snapshot: &Snapshot) -> Vec<String> {
    exp.targets
        .iter()
        .filter_map(|target| {
            let st = snapshot.get(target.name())?;
            Some(format!(
                "target: {}; TTFB P99: {:.3}ms; reqs: {}; dropped: {:.2}%; timeout: {:.2}%; server errors: {:.2}%",
                target.name(),
                st.ttfb.p99 * 1000.0,
                st.total_requests,
                percent(st.total_dropped, st.total_requests),
                percent(st.total_timeout_errors, st.total_requests),
                percent(st.total_http_5xx, connected(st)),
            ))
        })
        .collect()
}

/// Log the brief summary at info level
pub fn log_brief_summary(exp: &Experiment, snapshot: &Snapshot) {
    for line in brief_lines(exp, snapshot) {
        tracing::info!("{line}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures;

    fn render(snapshot: &Snapshot) -> String {
        let exp = fixtures::experiment();
        let mut out = Vec::new();
        write_full_summary(&mut out, &exp, snapshot).unwrap();
        String::from_utf8(out).unwrap()
    }

    #[test]
    fn test_full_summary() {
        let text = render(&fixtures::snapshot());

        assert!(text.starts_with("Target:  current\nBase URL: http://10.0.0.1:8080\n"));
        assert!(text.contains("Issued:                200\n"));
        assert!(text.contains("Connect Errors:          5 (  2.50%)\n"));
        assert!(text.contains("Dropped:                10 (  5.00%)\n"));
        assert!(text.contains("Connected:             185 ( 92.50%)\n"));
        assert!(text.contains("HTTP 2XX Responses:       160 ( 86.49%)\n"));
        assert!(text.contains("Time to first byte\n  Mean:    50.000ms\n"));
        assert!(text.contains("  P99:    360.000ms\n"));
        assert!(!text.contains("Other Responses"));
    }

    #[test]
    fn test_target_without_metrics() {
        let text = render(&fixtures::snapshot());
        assert!(text.contains("\nTarget:  candidate\nBase URL: https://10.0.0.2\n------------------------------\nno metrics available\n"));
    }

    #[test]
    fn test_empty_sample_has_no_nan() {
        let mut snapshot = Snapshot::new();
        snapshot.insert("current".into(), MetricSample::default());
        let text = render(&snapshot);
        assert!(!text.contains("NaN"));
        assert!(text.contains("Connected:               0 (  0.00%)\n"));
    }

    #[test]
    fn test_brief_lines() {
        let exp = fixtures::experiment();
        let lines = brief_lines(&exp, &fixtures::snapshot());
        assert_eq!(
            lines,
            ["target: current; TTFB P99: 150.000ms; reqs: 200; dropped: 5.00%; timeout: 2.50%; server errors: 5.41%"]
        );
    }
}
