//! Fatal violation reporting.
//!
//! A violation means the allocator metadata can no longer be trusted, so the
//! process is terminated after one diagnostic is written to stderr. The
//! record is either a single text line or a JSONL entry, depending on
//! `MMSAFE_DIAGNOSTICS`.

use std::io::Write;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::Serialize;

use crate::config::{DiagnosticFormat, diagnostic_format};
use crate::error::Violation;

/// Severity carried by structured records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Fatal,
}

/// Structured diagnostic record.
#[derive(Debug, Clone, Serialize)]
pub struct DiagnosticRecord<'a> {
    /// Milliseconds since the Unix epoch.
    pub timestamp_ms: u128,
    pub level: LogLevel,
    /// Checkpoint that detected the violation (`mm_free`, `mm_array_realloc`, ...).
    pub event: &'a str,
    pub message: String,
    pub violation: Violation,
}

impl<'a> DiagnosticRecord<'a> {
    #[must_use]
    pub fn new(violation: Violation, event: &'a str) -> Self {
        let timestamp_ms = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis())
            .unwrap_or(0);
        Self {
            timestamp_ms,
            level: LogLevel::Fatal,
            event,
            message: violation.to_string(),
            violation,
        }
    }
}

/// Render a violation in the requested format (no trailing newline).
#[must_use]
pub fn render(violation: Violation, event: &str, format: DiagnosticFormat) -> String {
    match format {
        DiagnosticFormat::Text => text_line(violation, event),
        DiagnosticFormat::Json => serde_json::to_string(&DiagnosticRecord::new(violation, event))
            .unwrap_or_else(|_| text_line(violation, event)),
    }
}

fn text_line(violation: Violation, event: &str) -> String {
    format!(
        "mmsafe: fatal: {violation} (kind={}, detected in {event})",
        violation.name()
    )
}

/// Report `violation` and abort the process.
///
/// Callers have already counted the violation in the global metrics.
pub fn fatal(violation: Violation, event: &str) -> ! {
    let line = render(violation, event, diagnostic_format());
    let mut stderr = std::io::stderr().lock();
    let _ = writeln!(stderr, "{line}");
    let _ = stderr.flush();
    std::process::abort()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn text_diagnostic_names_violation_and_site() {
        let v = Violation::DoubleFreeOrUseAfterFree {
            addr: 0x4010,
            expected: 5,
            found: 0,
        };
        let line = render(v, "mm_array_free", DiagnosticFormat::Text);
        assert!(line.starts_with("mmsafe: fatal: double free or use after free"));
        assert!(line.contains("kind=double_free_or_use_after_free"));
        assert!(line.contains("mm_array_free"));
    }

    #[test]
    fn json_diagnostic_is_one_parseable_record() {
        let v = Violation::InvalidFree {
            addr: 0x5008,
            offset: 8,
        };
        let line = render(v, "mm_free", DiagnosticFormat::Json);
        assert!(!line.contains('\n'));
        let parsed: serde_json::Value = serde_json::from_str(&line).unwrap();
        assert_eq!(parsed["level"], "fatal");
        assert_eq!(parsed["event"], "mm_free");
        assert_eq!(parsed["violation"]["kind"], "invalid_free");
        assert_eq!(parsed["violation"]["offset"], 8);
    }
}
