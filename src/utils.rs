use chrono::NaiveDate;
use sha2::{Digest, Sha256};

pub const MINUTES_PER_DAY: u16 = 24 * 60;

/// Parse a loosely written time of day into minutes since midnight.
///
/// Accepts `H:MM`, `HH:MM`, `HMM` and `HHMM` with surrounding whitespace.
/// `24:00` is the latest accepted value.
pub fn parse_time(raw: &str) -> Option<u16> {
    let s = raw.trim();
    let digits: String = s.chars().filter(|c| *c != ':').collect();
    if digits.len() < 3 || digits.len() > 4 || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    // at most one colon, and only in front of the minutes
    if let Some(pos) = s.find(':') {
        if pos != s.len() - 3 || s.matches(':').count() > 1 {
            return None;
        }
    }
    let (h, m) = digits.split_at(digits.len() - 2);
    let hours: u16 = h.parse().ok()?;
    let minutes: u16 = m.parse().ok()?;
    if minutes > 59 {
        return None;
    }
    let total = hours * 60 + minutes;
    (total <= MINUTES_PER_DAY).then_some(total)
}

/// Render minutes since midnight as `HH:MM`.
pub fn format_time(minutes: u16) -> String {
    format!("{:02}:{:02}", minutes / 60, minutes % 60)
}

/// Canonical `HH:MM` form of a loosely written time.
pub fn normalize_time(raw: &str) -> Option<String> {
    parse_time(raw).map(format_time)
}

/// Canonical `YYYY-MM-DD` form of `YYYY-MM-DD`, `YYYY/MM/DD` or `YYYYMMDD`.
pub fn normalize_date(raw: &str) -> Option<String> {
    let s = raw.trim();
    ["%Y-%m-%d", "%Y/%m/%d", "%Y%m%d"]
        .iter()
        .find_map(|fmt| NaiveDate::parse_from_str(s, fmt).ok())
        .map(|d| d.format("%Y-%m-%d").to_string())
}

/// Hex SHA-256 of file content, used to tell whether a file changed since it
/// was last loaded.
pub fn fingerprint(content: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content);
    hex::encode(hasher.finalize())
}

/// Split a list of handles written with commas and/or whitespace.
pub fn split_handles(raw: &str) -> Vec<String> {
    let mut handles = Vec::new();
    for token in raw.split(|c: char| c == ',' || c.is_whitespace()) {
        if !token.is_empty() && !handles.iter().any(|h| h == token) {
            handles.push(token.to_string());
        }
    }
    handles
}
