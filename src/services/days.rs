//! Day rows: the per org/site/date summary that visits, blocks and loads
//! hang off.

use crate::db::models::{self as dbm, DayId, DayKey, DaySummary, Weather};
use crate::db::validate::{check_date, check_summary, check_weather};
use crate::error::StoreError;
use crate::schema;
use crate::services::refs::resolve_site;
use diesel::prelude::*;
use diesel::SqliteConnection;
use log::{debug, info};

/// Insert the day for `key` or overwrite its summary fields.
///
/// Weather columns are left as they are so a re-import does not discard an
/// earlier lookup.
pub fn upsert_day(conn: &mut SqliteConnection, key: &DayKey, summary: &DaySummary) -> Result<DayId, StoreError> {
    conn.exclusive_transaction(|conn| upsert_day_tx(conn, key, summary))
}

pub(crate) fn upsert_day_tx(
    conn: &mut SqliteConnection,
    key: &DayKey,
    summary: &DaySummary,
) -> Result<DayId, StoreError> {
    use schema::day::dsl as D;

    let key_str = key.to_string();
    check_date(&key_str, &key.date)?;
    check_summary(&key_str, summary)?;
    let (org, site) = resolve_site(conn, &key.org, &key.site)?;

    let new_row = dbm::NewDay {
        org_id: org.id,
        site_id: site.id,
        date: key.date.clone(),
        time_open: summary.time_open.clone(),
        time_closed: summary.time_closed.clone(),
        num_parked_regular: summary.num_parked_regular,
        num_parked_oversize: summary.num_parked_oversize,
        num_parked_combined: summary.num_parked_combined,
        num_registrations: summary.num_registrations,
    };
    diesel::insert_into(D::day)
        .values(&new_row)
        .on_conflict((D::date, D::org_id, D::site_id))
        .do_update()
        .set((
            D::time_open.eq(new_row.time_open.clone()),
            D::time_closed.eq(new_row.time_closed.clone()),
            D::num_parked_regular.eq(new_row.num_parked_regular),
            D::num_parked_oversize.eq(new_row.num_parked_oversize),
            D::num_parked_combined.eq(new_row.num_parked_combined),
            D::num_registrations.eq(new_row.num_registrations),
        ))
        .execute(conn)
        .map_err(|e| StoreError::from_diesel("day", key_str.as_str(), e))?;

    let id: i32 = D::day
        .filter(D::date.eq(&key.date).and(D::org_id.eq(org.id)).and(D::site_id.eq(site.id)))
        .select(D::id)
        .first(conn)
        .map_err(|e| StoreError::from_diesel("day", key_str.as_str(), e))?;
    debug!("Days: upserted {}", key_str);
    Ok(DayId::new(id))
}

/// Look up the day for `key`. Unknown org or site handles are errors; a
/// missing day is `None`.
pub fn find_day(conn: &mut SqliteConnection, key: &DayKey) -> Result<Option<DayId>, StoreError> {
    Ok(get_day(conn, key)?.map(|d| DayId::new(d.id)))
}

pub fn get_day(conn: &mut SqliteConnection, key: &DayKey) -> Result<Option<dbm::Day>, StoreError> {
    use schema::day::dsl as D;

    let (org, site) = resolve_site(conn, &key.org, &key.site)?;
    D::day
        .filter(D::date.eq(&key.date).and(D::org_id.eq(org.id)).and(D::site_id.eq(site.id)))
        .select(dbm::Day::as_select())
        .first(conn)
        .optional()
        .map_err(|e| StoreError::from_diesel("day", key.to_string(), e))
}

/// Delete a day together with its visits, blocks and load records.
/// Returns whether a day existed.
pub fn delete_day(conn: &mut SqliteConnection, key: &DayKey) -> Result<bool, StoreError> {
    use schema::day::dsl as D;

    let deleted = conn.exclusive_transaction(|conn| {
        let Some(day) = find_day(conn, key)? else {
            return Ok(0);
        };
        diesel::delete(D::day.filter(D::id.eq(day.get())))
            .execute(conn)
            .map_err(|e| StoreError::from_diesel("day", key.to_string(), e))
    })?;
    if deleted > 0 {
        info!("Days: deleted {}", key);
    }
    Ok(deleted > 0)
}

/// Store the weather looked up for an existing day.
pub fn update_weather(conn: &mut SqliteConnection, key: &DayKey, weather: &Weather) -> Result<(), StoreError> {
    use schema::day::dsl as D;

    let key_str = key.to_string();
    check_weather(&key_str, weather)?;
    conn.exclusive_transaction(|conn| {
        let day = find_day(conn, key)?.ok_or_else(|| StoreError::not_found("day", key_str.as_str()))?;
        diesel::update(D::day.filter(D::id.eq(day.get())))
            .set((
                D::max_temperature.eq(weather.max_temperature),
                D::precipitation.eq(weather.precipitation),
                D::dusk.eq(weather.dusk.clone()),
            ))
            .execute(conn)
            .map_err(|e| StoreError::from_diesel("day", key_str.as_str(), e))
    })?;
    info!("Days: weather stored for {}", key_str);
    Ok(())
}

/// External key of a stored day. A day id that no longer exists is
/// `NotFound`.
pub(crate) fn describe_day(conn: &mut SqliteConnection, day: DayId) -> Result<String, StoreError> {
    use schema::day::dsl as D;
    use schema::org::dsl as O;
    use schema::site::dsl as S;

    D::day
        .inner_join(O::org)
        .inner_join(S::site)
        .filter(D::id.eq(day.get()))
        .select((O::org_handle, S::site_handle, D::date))
        .first::<(String, String, String)>(conn)
        .optional()?
        .map(|(org, site, date)| DayKey::new(org, site, date).to_string())
        .ok_or_else(|| StoreError::not_found("day", format!("id {}", day.get())))
}
