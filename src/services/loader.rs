//! Import of day files in the JSON exchange format.
//!
//! A day file describes one org/site/date with its visits:
//!
//! ```json
//! {
//!   "org": "acme",
//!   "site": "main",
//!   "date": "2024/06/01",
//!   "time_open": "8:00",
//!   "time_closed": "1800",
//!   "registrations": 3,
//!   "visits": [
//!     { "time_in": "09:15", "time_out": "11:40", "bike_type": "r", "bike_id": "wa12" },
//!     { "time_in": "09:20", "bike_type": "O" }
//!   ]
//! }
//! ```
//!
//! Each file is written in one exclusive transaction: upsert the day, replace
//! its visits and blocks, and record the load. A file whose fingerprint
//! matches the day's latest load is skipped unless forced.

use chrono::{DateTime, SecondsFormat, Utc};
use diesel::SqliteConnection;
use log::{error, info, warn};
use serde::Deserialize;
use std::fmt;
use std::path::{Path, PathBuf};

use crate::db::models::{self as dbm, DayKey, DaySummary, VisitRecord};
use crate::error::StoreError;
use crate::services::blocks::{compute_blocks, summarize_visits};
use crate::services::{days, ingest};
use crate::utils::{fingerprint, normalize_date, normalize_time, parse_time};

#[derive(Debug, Deserialize)]
struct DayFile {
    org: String,
    #[serde(default)]
    site: Option<String>,
    date: String,
    #[serde(default)]
    time_open: Option<String>,
    #[serde(default)]
    time_closed: Option<String>,
    #[serde(default)]
    registrations: Option<i32>,
    #[serde(default)]
    num_parked_regular: Option<i32>,
    #[serde(default)]
    num_parked_oversize: Option<i32>,
    #[serde(default)]
    num_parked_combined: Option<i32>,
    #[serde(default)]
    visits: Vec<VisitEntry>,
}

#[derive(Debug, Deserialize)]
struct VisitEntry {
    time_in: String,
    #[serde(default)]
    time_out: Option<String>,
    #[serde(default)]
    duration: Option<i32>,
    bike_type: String,
    #[serde(default)]
    bike_id: Option<String>,
}

/// A day file after normalization, ready for the store.
#[derive(Debug, Clone, PartialEq)]
pub struct DayImport {
    pub key: DayKey,
    pub summary: DaySummary,
    pub visits: Vec<VisitRecord>,
}

// Unreadable values are passed through unchanged so the store rejects them
// with the row's key.
fn loose_time(raw: &str) -> String {
    normalize_time(raw).unwrap_or_else(|| raw.trim().to_string())
}

impl DayFile {
    fn normalize(self) -> Result<DayImport, String> {
        let date = normalize_date(&self.date).unwrap_or(self.date);
        let site = self
            .site
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| dbm::UNSPECIFIED_SITE.to_string());

        let mut visits = Vec::with_capacity(self.visits.len());
        for (i, v) in self.visits.into_iter().enumerate() {
            let duration = match (v.duration, v.time_out.as_deref()) {
                (Some(d), _) => Some(d),
                (None, Some(out)) => {
                    let (Some(t_in), Some(t_out)) = (parse_time(&v.time_in), parse_time(out)) else {
                        return Err(format!("visit #{}: unreadable time_in '{}' or time_out '{}'", i + 1, v.time_in, out));
                    };
                    if t_out < t_in {
                        return Err(format!("visit #{}: time_out {} is before time_in {}", i + 1, out, v.time_in));
                    }
                    Some(i32::from(t_out - t_in))
                }
                (None, None) => None,
            };
            visits.push(VisitRecord {
                time_in: loose_time(&v.time_in),
                duration,
                bike_type: v.bike_type.trim().to_ascii_uppercase(),
                bike_id: v.bike_id.map(|b| b.trim().to_string()).filter(|b| !b.is_empty()),
            });
        }

        let mut summary = DaySummary {
            time_open: self.time_open.as_deref().map(loose_time),
            time_closed: self.time_closed.as_deref().map(loose_time),
            num_parked_regular: self.num_parked_regular,
            num_parked_oversize: self.num_parked_oversize,
            num_parked_combined: self.num_parked_combined,
            num_registrations: self.registrations,
        };
        if !visits.is_empty() {
            let totals = summarize_visits(&visits);
            summary.num_parked_regular.get_or_insert(totals.regular);
            summary.num_parked_oversize.get_or_insert(totals.oversize);
            summary.num_parked_combined.get_or_insert(totals.combined);
        }

        Ok(DayImport {
            key: DayKey::new(self.org.trim(), site, date),
            summary,
            visits,
        })
    }
}

/// Parse and normalize day file content.
pub fn parse_day_file(content: &[u8]) -> Result<DayImport, ParseFailure> {
    let de = &mut serde_json::Deserializer::from_slice(content);
    let file: DayFile = serde_path_to_error::deserialize(de).map_err(ParseFailure::Json)?;
    file.normalize().map_err(ParseFailure::Invalid)
}

#[derive(Debug)]
pub enum ParseFailure {
    Json(serde_path_to_error::Error<serde_json::Error>),
    Invalid(String),
}

#[derive(Debug)]
pub enum LoadError {
    Io { path: PathBuf, source: std::io::Error },
    Parse { path: PathBuf, source: serde_path_to_error::Error<serde_json::Error> },
    Invalid { path: PathBuf, detail: String },
    Store { path: PathBuf, source: StoreError },
}

impl fmt::Display for LoadError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LoadError::Io { path, source } => write!(f, "{}: {}", path.display(), source),
            LoadError::Parse { path, source } => {
                write!(f, "{}: invalid JSON at {}: {}", path.display(), source.path(), source.inner())
            }
            LoadError::Invalid { path, detail } => write!(f, "{}: {}", path.display(), detail),
            LoadError::Store { path, source } => write!(f, "{}: {}", path.display(), source),
        }
    }
}

impl std::error::Error for LoadError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            LoadError::Io { source, .. } => Some(source),
            LoadError::Parse { source, .. } => Some(source),
            LoadError::Invalid { .. } => None,
            LoadError::Store { source, .. } => Some(source),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoadOutcome {
    Loaded { key: DayKey, visits: usize, blocks: usize },
    Unchanged { key: DayKey },
}

/// Write one normalized day in a single exclusive transaction.
pub fn import_day(
    conn: &mut SqliteConnection,
    day: &DayImport,
    source: &str,
    fingerprint: &str,
    file_timestamp: Option<&str>,
    force: bool,
) -> Result<LoadOutcome, StoreError> {
    let block_rows = compute_blocks(&day.visits, day.summary.time_closed.as_deref());
    conn.exclusive_transaction(|conn| {
        if !force {
            if let Some(existing) = days::find_day(conn, &day.key)? {
                let seen = ingest::latest_load(conn, existing)?;
                if seen.is_some_and(|l| l.data_fingerprint == fingerprint) {
                    return Ok(LoadOutcome::Unchanged { key: day.key.clone() });
                }
            }
        }
        let id = days::upsert_day_tx(conn, &day.key, &day.summary)?;
        let visits = ingest::replace_visits_tx(conn, id, &day.visits)?;
        let blocks = ingest::replace_blocks_tx(conn, id, &block_rows)?;
        ingest::record_load_tx(conn, id, source, fingerprint, file_timestamp)?;
        Ok(LoadOutcome::Loaded {
            key: day.key.clone(),
            visits,
            blocks,
        })
    })
}

fn file_timestamp(path: &Path) -> Option<String> {
    let modified = std::fs::metadata(path).and_then(|m| m.modified()).ok()?;
    Some(DateTime::<Utc>::from(modified).to_rfc3339_opts(SecondsFormat::Secs, true))
}

pub fn load_file(conn: &mut SqliteConnection, path: &Path, force: bool) -> Result<LoadOutcome, LoadError> {
    let content = std::fs::read(path).map_err(|source| LoadError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let day = parse_day_file(&content).map_err(|e| match e {
        ParseFailure::Json(source) => LoadError::Parse {
            path: path.to_path_buf(),
            source,
        },
        ParseFailure::Invalid(detail) => LoadError::Invalid {
            path: path.to_path_buf(),
            detail,
        },
    })?;
    let fp = fingerprint(&content);
    let stamp = file_timestamp(path);
    import_day(conn, &day, &path.display().to_string(), &fp, stamp.as_deref(), force).map_err(|source| {
        LoadError::Store {
            path: path.to_path_buf(),
            source,
        }
    })
}

#[derive(Debug, Default)]
pub struct LoadReport {
    pub loaded: usize,
    pub unchanged: usize,
    pub failed: Vec<LoadError>,
}

/// Load every file in turn. A rejected file is reported and leaves the
/// database as it was; the remaining files are still processed.
pub fn load_files(conn: &mut SqliteConnection, paths: &[PathBuf], force: bool) -> LoadReport {
    let mut report = LoadReport::default();
    for path in paths {
        match load_file(conn, path, force) {
            Ok(LoadOutcome::Loaded { key, visits, blocks }) => {
                info!("Load: {} -> {} ({} visits, {} blocks)", path.display(), key, visits, blocks);
                report.loaded += 1;
            }
            Ok(LoadOutcome::Unchanged { key }) => {
                info!("Load: {} unchanged since last load of {}, skipped", path.display(), key);
                report.unchanged += 1;
            }
            Err(e) => {
                error!("Load: rejected {}", e);
                report.failed.push(e);
            }
        }
    }
    if !report.failed.is_empty() {
        warn!(
            "Load: {} loaded, {} unchanged, {} rejected",
            report.loaded,
            report.unchanged,
            report.failed.len()
        );
    }
    report
}
