use chrono::{DateTime, Local, NaiveDateTime, Utc};

/// Risk at or above this is high severity
pub const HIGH_RISK_THRESHOLD: f64 = 0.6;
/// Risk at or above this, and below high, is medium severity
pub const MEDIUM_RISK_THRESHOLD: f64 = 0.35;

/// Placeholder for any absent value
pub const MISSING: &str = "—";

pub const RISK_BAR_FILLED: char = '█';
pub const RISK_BAR_EMPTY: char = '░';

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, strum_macros::IntoStaticStr)]
#[strum(serialize_all = "lowercase")]
pub enum Severity {
    Low,
    Medium,
    High,
}

impl Severity {
    pub fn classify(score: f64) -> Self {
        if score >= HIGH_RISK_THRESHOLD {
            Severity::High
        } else if score >= MEDIUM_RISK_THRESHOLD {
            Severity::Medium
        } else {
            Severity::Low
        }
    }

    pub fn as_str(&self) -> &'static str {
        self.into()
    }
}

/// Fixed three decimals
pub fn score(value: f64) -> String {
    format!("{value:.3}")
}

pub fn or_missing(value: Option<&str>) -> String {
    value.filter(|v| !v.is_empty()).unwrap_or(MISSING).to_string()
}

/// Accepts RFC 3339 and naive ISO 8601, the latter being UTC
pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return Some(ts.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f")
        .or_else(|_| NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S%.f"))
        .ok()
        .map(|naive| naive.and_utc())
}

fn local(raw: Option<&str>, fmt: &str) -> String {
    raw.and_then(parse_timestamp)
        .map(|ts| ts.with_timezone(&Local).format(fmt).to_string())
        .unwrap_or_else(|| MISSING.to_string())
}

/// Local wall clock time, for live feeds
pub fn time_of_day(raw: Option<&str>) -> String {
    local(raw, "%H:%M:%S")
}

/// Local date and time, for audit tables
pub fn date_time(raw: Option<&str>) -> String {
    local(raw, "%Y-%m-%d %H:%M:%S")
}

/// "auto_cluster_freeze" -> "auto cluster freeze"
pub fn humanize(raw: Option<&str>) -> String {
    match raw.filter(|r| !r.is_empty()) {
        Some(r) => r.replace('_', " "),
        None => MISSING.to_string(),
    }
}

/// Horizontal bar proportional to the score, clamped to [0, 1]
pub fn risk_bar(value: f64, width: usize) -> String {
    let clamped = if value.is_nan() { 0.0 } else { value.clamp(0.0, 1.0) };
    let filled = (clamped * width as f64).round() as usize;
    let mut bar = String::with_capacity(width * 3);
    bar.extend(std::iter::repeat_n(RISK_BAR_FILLED, filled));
    bar.extend(std::iter::repeat_n(RISK_BAR_EMPTY, width - filled));
    bar
}

/// Arithmetic mean, the count floored at one so an empty set averages to zero
pub fn mean(values: impl IntoIterator<Item = f64>) -> f64 {
    let (sum, count) = values.into_iter().fold((0.0, 0usize), |(s, c), v| (s + v, c + 1));
    sum / count.max(1) as f64
}

/// First `max` characters followed by an ellipsis when cut
pub fn short(value: &str, max: usize) -> String {
    if value.chars().count() <= max {
        return value.to_string();
    }
    let mut out: String = value.chars().take(max).collect();
    out.push('…');
    out
}
