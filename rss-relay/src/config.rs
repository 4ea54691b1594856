use crate::types::{RelayError, Result};
use serde::Serialize;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

pub const DEFAULT_FETCH_INTERVAL: Duration = Duration::from_secs(13);
pub const DEFAULT_DELIVERY_INTERVAL: Duration = Duration::from_secs(24);
pub const DEFAULT_ITEMS_LIMIT: usize = 10;

const NANOS_PER_SEC: f64 = 1_000_000_000.0;
const NANOS_PER_MILLI: f64 = 1_000_000.0;

/// Knobs that the command front end may change while the pipeline runs.
///
/// Each field is its own atomic cell; there is no invariant spanning fields.
/// Timer loops read a value when they start waiting, so a write takes effect
/// on the next wait, never on one already in progress.
#[derive(Debug)]
pub struct RuntimeConfig {
    fetch_interval_nanos: AtomicU64,
    delivery_interval_nanos: AtomicU64,
    items_limit: AtomicUsize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ConfigSnapshot {
    #[serde(with = "duration_text")]
    pub fetch_interval: Duration,
    #[serde(with = "duration_text")]
    pub delivery_interval: Duration,
    pub items_limit: usize,
}

impl RuntimeConfig {
    pub fn new(fetch_interval: Duration, delivery_interval: Duration, items_limit: usize) -> Self {
        Self {
            fetch_interval_nanos: AtomicU64::new(to_nanos(fetch_interval)),
            delivery_interval_nanos: AtomicU64::new(to_nanos(delivery_interval)),
            items_limit: AtomicUsize::new(items_limit),
        }
    }

    pub fn fetch_interval(&self) -> Duration {
        Duration::from_nanos(self.fetch_interval_nanos.load(Ordering::Acquire))
    }

    pub fn set_fetch_interval(&self, interval: Duration) {
        self.fetch_interval_nanos
            .store(to_nanos(interval), Ordering::Release);
    }

    pub fn delivery_interval(&self) -> Duration {
        Duration::from_nanos(self.delivery_interval_nanos.load(Ordering::Acquire))
    }

    pub fn set_delivery_interval(&self, interval: Duration) {
        self.delivery_interval_nanos
            .store(to_nanos(interval), Ordering::Release);
    }

    pub fn items_limit(&self) -> usize {
        self.items_limit.load(Ordering::Acquire)
    }

    pub fn set_items_limit(&self, limit: usize) {
        self.items_limit.store(limit, Ordering::Release);
    }

    pub fn snapshot(&self) -> ConfigSnapshot {
        ConfigSnapshot {
            fetch_interval: self.fetch_interval(),
            delivery_interval: self.delivery_interval(),
            items_limit: self.items_limit(),
        }
    }
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self::new(
            DEFAULT_FETCH_INTERVAL,
            DEFAULT_DELIVERY_INTERVAL,
            DEFAULT_ITEMS_LIMIT,
        )
    }
}

fn to_nanos(duration: Duration) -> u64 {
    u64::try_from(duration.as_nanos()).unwrap_or(u64::MAX)
}

/// Parse durations like `300ms`, `13s`, `1m30s` or `1.5h`.
/// A bare number is taken as seconds. Anything under a millisecond is rejected,
/// since [`format_duration`] could not show it.
pub fn parse_duration(text: &str) -> Result<Duration> {
    let text = text.trim();
    let invalid = || RelayError::InvalidCommand(format!("invalid duration \"{}\"", text));

    if text.is_empty() {
        return Err(RelayError::InvalidCommand("missing duration".to_string()));
    }

    let nanos = if let Ok(secs) = text.parse::<f64>() {
        secs * NANOS_PER_SEC
    } else {
        let mut total = 0.0;
        let mut rest = text;
        while !rest.is_empty() {
            let number_len = rest
                .find(|c: char| !(c.is_ascii_digit() || c == '.'))
                .ok_or_else(invalid)?;
            let value: f64 = rest[..number_len].parse().map_err(|_| invalid())?;
            rest = &rest[number_len..];

            let unit_len = rest
                .find(|c: char| c.is_ascii_digit() || c == '.')
                .unwrap_or(rest.len());
            let scale = match &rest[..unit_len] {
                "ms" => NANOS_PER_MILLI,
                "s" => NANOS_PER_SEC,
                "m" => 60.0 * NANOS_PER_SEC,
                "h" => 3600.0 * NANOS_PER_SEC,
                _ => return Err(invalid()),
            };
            rest = &rest[unit_len..];
            total += value * scale;
        }
        total
    };
    let total_nanos = nanos.round();

    if !total_nanos.is_finite() || total_nanos <= 0.0 {
        return Err(RelayError::InvalidCommand(format!(
            "duration must be positive, got \"{}\"",
            text
        )));
    }
    if total_nanos < NANOS_PER_MILLI {
        return Err(RelayError::InvalidCommand(format!(
            "duration must be at least 1ms, got \"{}\"",
            text
        )));
    }
    if total_nanos >= u64::MAX as f64 {
        return Err(invalid());
    }

    Ok(Duration::from_nanos(total_nanos as u64))
}

/// Render a duration the way [`parse_duration`] reads it back, e.g. `1m30s`.
pub fn format_duration(duration: Duration) -> String {
    let total_millis = duration.as_millis();
    if total_millis == 0 {
        return "0s".to_string();
    }
    if total_millis < 1000 {
        return format!("{}ms", total_millis);
    }

    let hours = total_millis / 3_600_000;
    let minutes = (total_millis / 60_000) % 60;
    let seconds = (total_millis / 1000) % 60;
    let millis = total_millis % 1000;

    let mut out = String::new();
    if hours > 0 {
        out.push_str(&format!("{}h", hours));
    }
    if minutes > 0 {
        out.push_str(&format!("{}m", minutes));
    }
    if millis > 0 {
        let fraction = format!("{:03}", millis);
        out.push_str(&format!("{}.{}s", seconds, fraction.trim_end_matches('0')));
    } else if seconds > 0 {
        out.push_str(&format!("{}s", seconds));
    }
    out
}

mod duration_text {
    use serde::Serializer;
    use std::time::Duration;

    pub fn serialize<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&super::format_duration(*duration))
    }
}
