use crate::db::models::{bike_type, load_source, DayKey, DaySummary, VisitRecord, Weather};
use crate::error::StoreError;
use crate::services::days::update_weather;
use crate::services::loader::{import_day, DayImport};
use crate::services::refs::{create_org, create_site, find_org, resolve_site};
use crate::utils::{fingerprint, format_time};
use chrono::{Datelike, Days, NaiveDate, Weekday};
use diesel::SqliteConnection;
use log::info;
use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};
use std::f64::consts::PI;

pub const DEFAULT_SEED: u64 = 0x0B1C_7C1E_5EED_0001;

const OVERSIZE_SHARE: f64 = 0.12;
const NEVER_COLLECTED_SHARE: f64 = 0.03;

/// Write `days` synthetic days for `org`/`site` starting at `from`, creating
/// the org and site when they are missing. The same seed always produces the
/// same visits. Returns the number of days written.
pub fn run(
    conn: &mut SqliteConnection,
    org: &str,
    site: &str,
    from: NaiveDate,
    days: u32,
    seed: u64,
) -> Result<usize, StoreError> {
    if days == 0 {
        return Err(StoreError::Usage("fake data needs at least one day".to_string()));
    }
    ensure_site(conn, org, site)?;
    let mut rng = SmallRng::seed_from_u64(seed);

    info!("Fake data: generating {} day(s) for {}/{} from {}", days, org, site, from);

    let mut written = 0;
    let mut total_visits = 0;
    let mut last_logged_month: Option<(i32, u32)> = None;
    for offset in 0..days {
        let Some(date) = from.checked_add_days(Days::new(u64::from(offset))) else {
            break;
        };
        let month_key = (date.year(), date.month());
        if last_logged_month != Some(month_key) {
            info!(
                "Fake data: processing {:04}-{:02} ({} day(s) remaining)",
                month_key.0,
                month_key.1,
                days - offset
            );
            last_logged_month = Some(month_key);
        }

        let weather = compute_weather(date, &mut rng);
        let day = compute_day(org, site, date, &weather, &mut rng);
        let fp = fingerprint(format!("{}:{}:{}", seed, day.key, day.visits.len()).as_bytes());
        import_day(conn, &day, load_source::SYNTHETIC, &fp, None, true)?;
        update_weather(conn, &day.key, &weather)?;

        written += 1;
        total_visits += day.visits.len();
    }

    info!("Fake data: complete (days={}, visits={})", written, total_visits);
    Ok(written)
}

fn ensure_site(conn: &mut SqliteConnection, org: &str, site: &str) -> Result<(), StoreError> {
    if find_org(conn, org)?.is_none() {
        create_org(conn, org, Some("Synthetic data"), &[])?;
    }
    match resolve_site(conn, org, site) {
        Ok(_) => Ok(()),
        Err(StoreError::NotFound { entity: "site", .. }) => create_site(conn, org, Some(site), None),
        Err(e) => Err(e),
    }
}

/// Opening hours by weekday, in minutes since midnight.
fn opening_hours(weekday: Weekday) -> (u16, u16) {
    if is_weekend(weekday) {
        (10 * 60, 18 * 60)
    } else {
        (7 * 60 + 30, 21 * 60)
    }
}

fn compute_day(org: &str, site: &str, date: NaiveDate, weather: &Weather, rng: &mut SmallRng) -> DayImport {
    let weekday = date.weekday();
    let (open, close) = opening_hours(weekday);
    let annual_fraction = date.ordinal0() as f64 / 365.0;

    let base = if is_weekend(weekday) { 90.0 } else { 60.0 };
    let seasonal = 1.0 - ((annual_fraction * 2.0 * PI).cos() * 0.45);
    let rain_factor = match weather.precipitation {
        Some(p) if p > 5.0 => 0.45,
        Some(p) if p > 0.0 => 0.75,
        _ => 1.0,
    };
    let count = (base * seasonal * rain_factor * rng.random_range(0.8..=1.2)).round() as usize;

    let mut visits = Vec::with_capacity(count);
    for n in 0..count {
        let time_in = sample_arrival(open, close, weekday, rng);
        let duration = if rng.random_bool(NEVER_COLLECTED_SHARE) {
            None
        } else {
            let stay: u16 = rng.random_range(15..=420);
            Some(i32::from(stay.min(close.saturating_sub(time_in))))
        };
        let kind = if rng.random_bool(OVERSIZE_SHARE) {
            bike_type::OVERSIZE
        } else {
            bike_type::REGULAR
        };
        visits.push(VisitRecord {
            time_in: format_time(time_in),
            duration,
            bike_type: kind.to_string(),
            bike_id: Some(format!("{}{}", kind.to_ascii_lowercase(), n + 1)),
        });
    }
    visits.sort_by(|a, b| a.time_in.cmp(&b.time_in));

    let registrations = visits.len() / 20;
    let mut summary = DaySummary {
        time_open: Some(format_time(open)),
        time_closed: Some(format_time(close)),
        num_registrations: Some(registrations as i32),
        ..DaySummary::default()
    };
    let oversize = visits.iter().filter(|v| v.is_oversize()).count() as i32;
    summary.num_parked_oversize = Some(oversize);
    summary.num_parked_regular = Some(visits.len() as i32 - oversize);
    summary.num_parked_combined = Some(visits.len() as i32);

    DayImport {
        key: DayKey::new(org, site, date.format("%Y-%m-%d").to_string()),
        summary,
        visits,
    }
}

fn sample_arrival(open: u16, close: u16, weekday: Weekday, rng: &mut SmallRng) -> u16 {
    let last = close.saturating_sub(1).max(open);
    let mut minute = open;
    for _ in 0..64 {
        minute = rng.random_range(open..=last);
        let day_fraction = f64::from(minute) / 1440.0;
        if rng.random_range(0.0..1.0) < arrival_profile(day_fraction, weekday) {
            break;
        }
    }
    minute
}

// Relative arrival rate in [0.15, 1].
fn arrival_profile(day_fraction: f64, weekday: Weekday) -> f64 {
    let shape = if is_weekend(weekday) {
        gaussian(day_fraction, 0.52, 0.09)
    } else {
        gaussian(day_fraction, 0.34, 0.04) + 0.8 * gaussian(day_fraction, 0.73, 0.05)
    };
    (0.15 + shape).min(1.0)
}

fn compute_weather(date: NaiveDate, rng: &mut SmallRng) -> Weather {
    let annual_fraction = date.ordinal0() as f64 / 365.0;
    let seasonal = -(annual_fraction * 2.0 * PI).cos();
    let max_temperature = 13.0 + seasonal * 11.0 + rng.random_range(-3.0..=3.0);
    let precipitation: f64 = if rng.random_bool(0.3) {
        rng.random_range(0.2..=18.0)
    } else {
        0.0
    };
    let dusk = (19.0 * 60.0 + seasonal * 150.0).round() as u16;
    Weather {
        max_temperature: Some((max_temperature * 10.0).round() / 10.0),
        precipitation: Some((precipitation * 10.0).round() / 10.0),
        dusk: Some(format_time(dusk)),
    }
}

fn gaussian(x: f64, center: f64, width: f64) -> f64 {
    let exponent = -((x - center) * (x - center)) / (2.0 * width * width);
    exponent.exp()
}

fn is_weekend(weekday: Weekday) -> bool {
    matches!(weekday, Weekday::Sat | Weekday::Sun)
}
