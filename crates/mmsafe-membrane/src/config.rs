//! Runtime configuration.
//!
//! Knobs are read from the environment on first use and cached:
//! - `MMSAFE_TAG_SOURCE`: `counter` (default) issues tags from a monotonic
//!   counter; `random` draws them from RDRAND / `getrandom(2)`.
//! - `MMSAFE_DIAGNOSTICS`: `text` (default) or `json` for fatal reports.
//! - `MMSAFE_PORTING_REGISTRY`: `1` tracks raw addresses of checked
//!   allocations so `porting::uncertain_free` can tell them apart.

use std::sync::atomic::{AtomicU8, Ordering};

/// Strategy used to issue generation tags.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TagSource {
    /// Monotonic counter seeded past the reserved range.
    #[default]
    Counter,
    /// Hardware random draws with rejection of reserved and repeated values.
    Random,
}

impl TagSource {
    /// Parse from string (case-insensitive). Unknown values fall back to `Counter`.
    #[must_use]
    pub fn from_str_loose(s: &str) -> Self {
        match s.to_ascii_lowercase().as_str() {
            "random" | "rdrand" | "hw" | "hardware" => Self::Random,
            _ => Self::Counter,
        }
    }
}

/// Output format for fatal diagnostics.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DiagnosticFormat {
    /// One human-readable line on stderr.
    #[default]
    Text,
    /// One JSONL record on stderr.
    Json,
}

impl DiagnosticFormat {
    /// Parse from string (case-insensitive). Unknown values fall back to `Text`.
    #[must_use]
    pub fn from_str_loose(s: &str) -> Self {
        match s.to_ascii_lowercase().as_str() {
            "json" | "jsonl" | "structured" => Self::Json,
            _ => Self::Text,
        }
    }
}

const UNRESOLVED: u8 = 0;
const RESOLVING: u8 = 255;

/// Environment-backed setting cached as a small integer.
///
/// 0 means unresolved and 255 means another caller is resolving; any other
/// value is the resolved encoding. Callers that observe the resolving state
/// get the default instead of waiting.
struct CachedSetting {
    state: AtomicU8,
    var: &'static str,
}

impl CachedSetting {
    const fn new(var: &'static str) -> Self {
        Self {
            state: AtomicU8::new(UNRESOLVED),
            var,
        }
    }

    fn get(&self, parse: fn(&str) -> u8, default: u8) -> u8 {
        let cached = self.state.load(Ordering::Relaxed);
        if cached != UNRESOLVED && cached != RESOLVING {
            return cached;
        }
        if cached == RESOLVING {
            return default;
        }

        if self
            .state
            .compare_exchange(UNRESOLVED, RESOLVING, Ordering::SeqCst, Ordering::Relaxed)
            .is_err()
        {
            let v = self.state.load(Ordering::Relaxed);
            return if v != UNRESOLVED && v != RESOLVING {
                v
            } else {
                default
            };
        }

        let value = std::env::var(self.var)
            .map(|v| parse(&v))
            .unwrap_or(default);
        self.state.store(value, Ordering::Release);
        value
    }

    #[cfg(test)]
    fn swap(&self, value: u8) -> u8 {
        self.state.swap(value, Ordering::SeqCst)
    }
}

static TAG_SOURCE: CachedSetting = CachedSetting::new("MMSAFE_TAG_SOURCE");
static DIAGNOSTICS: CachedSetting = CachedSetting::new("MMSAFE_DIAGNOSTICS");
static PORTING_REGISTRY: CachedSetting = CachedSetting::new("MMSAFE_PORTING_REGISTRY");

const SOURCE_COUNTER: u8 = 1;
const SOURCE_RANDOM: u8 = 2;
const FORMAT_TEXT: u8 = 1;
const FORMAT_JSON: u8 = 2;
const FLAG_OFF: u8 = 1;
const FLAG_ON: u8 = 2;

fn parse_tag_source(raw: &str) -> u8 {
    match TagSource::from_str_loose(raw) {
        TagSource::Counter => SOURCE_COUNTER,
        TagSource::Random => SOURCE_RANDOM,
    }
}

fn parse_format(raw: &str) -> u8 {
    match DiagnosticFormat::from_str_loose(raw) {
        DiagnosticFormat::Text => FORMAT_TEXT,
        DiagnosticFormat::Json => FORMAT_JSON,
    }
}

fn parse_flag(raw: &str) -> u8 {
    match raw.to_ascii_lowercase().as_str() {
        "1" | "on" | "true" | "yes" => FLAG_ON,
        _ => FLAG_OFF,
    }
}

/// Configured tag source (reads `MMSAFE_TAG_SOURCE` on first call).
#[must_use]
pub fn tag_source() -> TagSource {
    match TAG_SOURCE.get(parse_tag_source, SOURCE_COUNTER) {
        SOURCE_RANDOM => TagSource::Random,
        _ => TagSource::Counter,
    }
}

/// Configured diagnostic format (reads `MMSAFE_DIAGNOSTICS` on first call).
#[must_use]
pub fn diagnostic_format() -> DiagnosticFormat {
    match DIAGNOSTICS.get(parse_format, FORMAT_TEXT) {
        FORMAT_JSON => DiagnosticFormat::Json,
        _ => DiagnosticFormat::Text,
    }
}

/// Whether the porting registry starts enabled (reads `MMSAFE_PORTING_REGISTRY`).
#[must_use]
pub fn porting_registry_enabled() -> bool {
    PORTING_REGISTRY.get(parse_flag, FLAG_OFF) == FLAG_ON
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_tag_sources() {
        assert_eq!(TagSource::from_str_loose("counter"), TagSource::Counter);
        assert_eq!(TagSource::from_str_loose("RANDOM"), TagSource::Random);
        assert_eq!(TagSource::from_str_loose("rdrand"), TagSource::Random);
        assert_eq!(TagSource::from_str_loose("bogus"), TagSource::Counter);
    }

    #[test]
    fn parse_diagnostic_formats() {
        assert_eq!(DiagnosticFormat::from_str_loose("json"), DiagnosticFormat::Json);
        assert_eq!(DiagnosticFormat::from_str_loose("JSONL"), DiagnosticFormat::Json);
        assert_eq!(DiagnosticFormat::from_str_loose("text"), DiagnosticFormat::Text);
        assert_eq!(DiagnosticFormat::from_str_loose(""), DiagnosticFormat::Text);
    }

    #[test]
    fn flag_parser_accepts_common_truthy_values() {
        assert_eq!(parse_flag("1"), FLAG_ON);
        assert_eq!(parse_flag("TRUE"), FLAG_ON);
        assert_eq!(parse_flag("0"), FLAG_OFF);
        assert_eq!(parse_flag("nope"), FLAG_OFF);
    }

    #[test]
    fn cached_format_is_sticky_until_cache_reset() {
        let previous = DIAGNOSTICS.swap(FORMAT_JSON);
        assert_eq!(diagnostic_format(), DiagnosticFormat::Json);
        assert_eq!(diagnostic_format(), DiagnosticFormat::Json);
        DIAGNOSTICS.swap(previous);
    }

    #[test]
    fn resolving_state_returns_default() {
        let previous = TAG_SOURCE.swap(RESOLVING);
        assert_eq!(tag_source(), TagSource::Counter);
        TAG_SOURCE.swap(previous);
    }
}
