//! Read-side queries, each answered from one read snapshot. Reports across
//! organizations are scoped to the organizations visible to the viewer.

use std::collections::HashMap;

use diesel::dsl::count_star;
use diesel::prelude::*;
use diesel::sqlite::Sqlite;
use diesel::SqliteConnection;
use log::debug;
use serde::Serialize;

use crate::db::models::{self as dbm, DayId, DayKey};
use crate::error::StoreError;
use crate::schema;
use crate::services::refs::visible_org_rows;
use crate::services::{days, ingest};
use crate::utils::normalize_date;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DayReportRow {
    pub org: String,
    pub site: String,
    pub date: String,
    pub time_open: Option<String>,
    pub time_closed: Option<String>,
    pub num_parked_regular: Option<i32>,
    pub num_parked_oversize: Option<i32>,
    pub num_parked_combined: Option<i32>,
    pub num_registrations: Option<i32>,
    pub max_temperature: Option<f64>,
    pub precipitation: Option<f64>,
    pub dusk: Option<String>,
    pub visits: i64,
}

fn bound(raw: Option<&str>) -> Result<Option<String>, StoreError> {
    raw.map(|d| normalize_date(d).ok_or_else(|| StoreError::Usage(format!("'{}' is not a date", d))))
        .transpose()
}

/// Days of every organization `viewer` may read, optionally limited to an
/// inclusive date range, ordered by date, org and site.
pub fn visible_days(
    conn: &mut SqliteConnection,
    viewer: &str,
    from: Option<&str>,
    to: Option<&str>,
) -> Result<Vec<DayReportRow>, StoreError> {
    use schema::day::dsl as D;
    use schema::org::dsl as O;
    use schema::site::dsl as S;
    use schema::visit::dsl as V;

    let from = bound(from)?;
    let to = bound(to)?;

    conn.transaction(|conn| {
        let org_ids: Vec<i32> = visible_org_rows(conn, viewer)?.iter().map(|o| o.id).collect();

        let mut query = D::day
            .inner_join(O::org)
            .inner_join(S::site)
            .filter(D::org_id.eq_any(org_ids))
            .select((O::org_handle, S::site_handle, dbm::Day::as_select()))
            .into_boxed::<Sqlite>();
        if let Some(from) = &from {
            query = query.filter(D::date.ge(from.clone()));
        }
        if let Some(to) = &to {
            query = query.filter(D::date.le(to.clone()));
        }
        let days: Vec<(String, String, dbm::Day)> = query
            .order((D::date.asc(), O::org_handle.asc(), S::site_handle.asc()))
            .load(conn)?;

        let day_ids: Vec<i32> = days.iter().map(|(_, _, d)| d.id).collect();
        let counts: HashMap<i32, i64> = V::visit
            .filter(V::day_id.eq_any(day_ids))
            .group_by(V::day_id)
            .select((V::day_id, count_star()))
            .load::<(i32, i64)>(conn)?
            .into_iter()
            .collect();
        debug!("Reports: {} day(s) visible to {}", days.len(), viewer);

        Ok(days
            .into_iter()
            .map(|(org, site, d)| DayReportRow {
                visits: counts.get(&d.id).copied().unwrap_or(0),
                org,
                site,
                date: d.date,
                time_open: d.time_open,
                time_closed: d.time_closed,
                num_parked_regular: d.num_parked_regular,
                num_parked_oversize: d.num_parked_oversize,
                num_parked_combined: d.num_parked_combined,
                num_registrations: d.num_registrations,
                max_temperature: d.max_temperature,
                precipitation: d.precipitation,
                dusk: d.dusk,
            })
            .collect())
    })
}

/// One day with everything stored under it.
#[derive(Debug, Clone, Serialize)]
pub struct DayDetail {
    pub org: String,
    pub site: String,
    pub day: dbm::Day,
    pub visits: Vec<dbm::Visit>,
    pub blocks: Vec<dbm::Block>,
    pub latest_load: Option<dbm::DataLoad>,
}

/// The day for `key` with its visits, blocks and latest load, or `None` when
/// the day does not exist.
pub fn day_detail(conn: &mut SqliteConnection, key: &DayKey) -> Result<Option<DayDetail>, StoreError> {
    conn.transaction(|conn| {
        let Some(day) = days::get_day(conn, key)? else {
            return Ok(None);
        };
        let id = DayId::new(day.id);
        let visits = ingest::visits_for_day(conn, id)?;
        let blocks = ingest::blocks_for_day(conn, id)?;
        let latest_load = ingest::latest_load(conn, id)?;
        debug!("Reports: {} with {} visit(s), {} block(s)", key, visits.len(), blocks.len());
        Ok(Some(DayDetail {
            org: key.org.clone(),
            site: key.site.clone(),
            day,
            visits,
            blocks,
            latest_load,
        }))
    })
}
