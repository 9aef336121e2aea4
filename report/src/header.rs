use std::io::{self, Write};

use chrono::{DateTime, Utc};
use dealgood_core::{Experiment, RunDuration};

/// Describe the experiment about to run
pub fn write_header<W: Write>(
    w: &mut W,
    exp: &Experiment,
    source: &str,
    now: DateTime<Utc>,
) -> io::Result<()> {
    writeln!(w, "Time: {}", now.to_rfc2822())?;
    writeln!(w, "Experiment: {}", exp.name)?;
    writeln!(w, "Duration: {}", describe_duration(exp.duration))?;
    writeln!(w, "Request rate: {}", exp.rate)?;
    writeln!(w, "Request concurrency: {}", exp.concurrency)?;
    writeln!(w, "Request filter: {}", exp.filter)?;
    writeln!(w, "Request source: {source}")?;
    writeln!(w, "Targets:")?;
    for target in &exp.targets {
        write!(
            w,
            "  {} ({}://{})",
            target.name(),
            target.scheme().as_str(),
            target.host_port()
        )?;
        if target.has_host_override() {
            write!(w, " host={}", target.host_name())?;
        }
        writeln!(w)?;
    }
    writeln!(w)
}

fn describe_duration(duration: RunDuration) -> String {
    match duration {
        RunDuration::Bounded(d) => format!("{}s", d.as_secs()),
        RunDuration::Unbounded => "unbounded".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures;
    use chrono::TimeZone;

    #[test]
    fn test_header() {
        let exp = fixtures::experiment();
        let now = Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap();
        let mut out = Vec::new();
        write_header(&mut out, &exp, "stdin", now).unwrap();
        let text = String::from_utf8(out).unwrap();

        assert!(text.starts_with("Time: Fri, 1 Mar 2024 12:00:00 +0000\n"));
        assert!(text.contains("Experiment: gateways\n"));
        assert!(text.contains("Duration: 60s\n"));
        assert!(text.contains("Request rate: 20\n"));
        assert!(text.contains("Request concurrency: 4\n"));
        assert!(text.contains("Request source: stdin\n"));
        assert!(text.contains("  current (http://10.0.0.1:8080)\n"));
        assert!(text.contains("  candidate (https://10.0.0.2:443) host=ipfs.example\n"));
    }

    #[test]
    fn test_unbounded_duration() {
        assert_eq!(describe_duration(RunDuration::Unbounded), "unbounded");
    }
}
