//! Process-wide flags initialized once and read everywhere.
//!
//! The original system keeps these as bare globals guarded by a one-shot
//! init. We do the same with `OnceLock`, but behind a small struct so call
//! sites pass `&RuntimeFlags` explicitly instead of reaching for a free
//! function — the one initialization site lives in `main.rs`.

use std::env;
use std::sync::OnceLock;
use std::time::Duration;

const KUBERNETES_TIMEOUT_ENV: &str = "DEVCTL_KUBERNETES_TIMEOUT";
const DEFAULT_KUBERNETES_TIMEOUT: Duration = Duration::from_secs(30);

static KUBERNETES_TIMEOUT: OnceLock<Duration> = OnceLock::new();
static INSECURE_TLS: OnceLock<bool> = OnceLock::new();

#[derive(Clone, Copy, Debug)]
pub struct RuntimeFlags {
    _private: (),
}

impl RuntimeFlags {
    /// Parses the one-shot globals from the environment. Safe to call more
    /// than once; only the first call's values stick.
    pub fn init(insecure_tls: bool) -> Self {
        KUBERNETES_TIMEOUT.get_or_init(|| match env::var(KUBERNETES_TIMEOUT_ENV) {
            Ok(raw) => match parse_duration(&raw) {
                Some(d) => d,
                None => {
                    tracing::warn!(value = %raw, env = KUBERNETES_TIMEOUT_ENV, "invalid duration, ignoring");
                    DEFAULT_KUBERNETES_TIMEOUT
                }
            },
            Err(_) => DEFAULT_KUBERNETES_TIMEOUT,
        });
        INSECURE_TLS.get_or_init(|| insecure_tls);
        Self { _private: () }
    }

    pub fn kubernetes_timeout(&self) -> Duration {
        *KUBERNETES_TIMEOUT.get().unwrap_or(&DEFAULT_KUBERNETES_TIMEOUT)
    }

    pub fn insecure_tls(&self) -> bool {
        *INSECURE_TLS.get().unwrap_or(&false)
    }
}

/// Parses a Go-style duration string (`"30s"`, `"1m30s"`, `"500ms"`). Only
/// the units the control-plane timeout actually uses are supported.
fn parse_duration(raw: &str) -> Option<Duration> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }
    let mut total = Duration::ZERO;
    let mut digits = String::new();
    let mut chars = raw.chars().peekable();
    let mut consumed_any = false;
    while let Some(&c) = chars.peek() {
        if c.is_ascii_digit() || c == '.' {
            digits.push(c);
            chars.next();
            continue;
        }
        if digits.is_empty() {
            return None;
        }
        let mut unit = String::new();
        while let Some(&c) = chars.peek() {
            if c.is_ascii_digit() || c == '.' {
                break;
            }
            unit.push(c);
            chars.next();
        }
        let value: f64 = digits.parse().ok()?;
        let unit_duration = match unit.as_str() {
            "ns" => Duration::from_nanos(1),
            "us" | "\u{b5}s" => Duration::from_micros(1),
            "ms" => Duration::from_millis(1),
            "s" => Duration::from_secs(1),
            "m" => Duration::from_secs(60),
            "h" => Duration::from_secs(3600),
            _ => return None,
        };
        total += unit_duration.mul_f64(value);
        digits.clear();
        consumed_any = true;
    }
    if !digits.is_empty() || !consumed_any {
        return None;
    }
    Some(total)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_plain_seconds() {
        assert_eq!(parse_duration("30s"), Some(Duration::from_secs(30)));
    }

    #[test]
    fn parses_compound_units() {
        assert_eq!(
            parse_duration("1m30s"),
            Some(Duration::from_secs(90))
        );
    }

    #[test]
    fn rejects_garbage() {
        assert_eq!(parse_duration("not-a-duration"), None);
        assert_eq!(parse_duration(""), None);
        assert_eq!(parse_duration("30"), None);
    }
}
