use crate::db::models::{self as dbm, BlockRecord, DayId, VisitRecord};
use crate::db::validate::{check_block, check_visit};
use crate::error::StoreError;
use crate::schema;
use crate::services::days::describe_day;
use chrono::{SecondsFormat, Utc};
use diesel::prelude::*;
use diesel::SqliteConnection;
use log::debug;

/// Replace every visit of `day` with `visits`. Either the whole set is
/// written or the previous set stays in place.
pub fn replace_visits(conn: &mut SqliteConnection, day: DayId, visits: &[VisitRecord]) -> Result<usize, StoreError> {
    conn.exclusive_transaction(|conn| replace_visits_tx(conn, day, visits))
}

pub(crate) fn replace_visits_tx(
    conn: &mut SqliteConnection,
    day: DayId,
    visits: &[VisitRecord],
) -> Result<usize, StoreError> {
    use schema::visit::dsl as V;

    let key = describe_day(conn, day)?;
    for (i, v) in visits.iter().enumerate() {
        check_visit(&key, i, v)?;
    }

    let removed = diesel::delete(V::visit.filter(V::day_id.eq(day.get())))
        .execute(conn)
        .map_err(|e| StoreError::from_diesel("visit", key.as_str(), e))?;
    for (i, v) in visits.iter().enumerate() {
        let row = dbm::NewVisit {
            day_id: day.get(),
            time_in: &v.time_in,
            duration: v.duration,
            bike_type: &v.bike_type,
            bike_id: v.bike_id.as_deref(),
        };
        diesel::insert_into(V::visit)
            .values(&row)
            .execute(conn)
            .map_err(|e| StoreError::from_diesel("visit", format!("{} #{}", key, i + 1), e))?;
    }
    debug!("Ingest: {} visit(s) replaced by {} for {}", removed, visits.len(), key);
    Ok(visits.len())
}

/// Replace every block of `day` with `blocks`, all or nothing.
pub fn replace_blocks(conn: &mut SqliteConnection, day: DayId, blocks: &[BlockRecord]) -> Result<usize, StoreError> {
    conn.exclusive_transaction(|conn| replace_blocks_tx(conn, day, blocks))
}

pub(crate) fn replace_blocks_tx(
    conn: &mut SqliteConnection,
    day: DayId,
    blocks: &[BlockRecord],
) -> Result<usize, StoreError> {
    use schema::block::dsl as B;

    let key = describe_day(conn, day)?;
    for b in blocks {
        check_block(&key, b)?;
    }

    diesel::delete(B::block.filter(B::day_id.eq(day.get())))
        .execute(conn)
        .map_err(|e| StoreError::from_diesel("block", key.as_str(), e))?;
    for b in blocks {
        let row = dbm::NewBlock {
            day_id: day.get(),
            time_start: &b.time_start,
            num_regular_at_start: b.num_regular_at_start,
            num_oversize_at_start: b.num_oversize_at_start,
            num_regular_at_end: b.num_regular_at_end,
            num_oversize_at_end: b.num_oversize_at_end,
            num_bikes_at_start: b.num_bikes_at_start,
            num_bikes_at_end: b.num_bikes_at_end,
            num_most_full: b.num_most_full,
            time_most_full: b.time_most_full.as_deref(),
        };
        diesel::insert_into(B::block)
            .values(&row)
            .execute(conn)
            .map_err(|e| StoreError::from_diesel("block", format!("{} @{}", key, b.time_start), e))?;
    }
    debug!("Ingest: {} block(s) written for {}", blocks.len(), key);
    Ok(blocks.len())
}

/// Append a provenance row for an import of `day`.
pub fn record_load(
    conn: &mut SqliteConnection,
    day: DayId,
    source: &str,
    fingerprint: &str,
    file_timestamp: Option<&str>,
) -> Result<(), StoreError> {
    conn.exclusive_transaction(|conn| record_load_tx(conn, day, source, fingerprint, file_timestamp))
}

pub(crate) fn record_load_tx(
    conn: &mut SqliteConnection,
    day: DayId,
    source: &str,
    fingerprint: &str,
    file_timestamp: Option<&str>,
) -> Result<(), StoreError> {
    use schema::dataload::dsl as L;

    let key = describe_day(conn, day)?;
    let row = dbm::NewDataLoad {
        day_id: day.get(),
        data_source: source,
        data_fingerprint: fingerprint,
        file_timestamp,
        load_timestamp: Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true),
    };
    diesel::insert_into(L::dataload)
        .values(&row)
        .execute(conn)
        .map_err(|e| StoreError::from_diesel("dataload", format!("{} {}", key, source), e))?;
    Ok(())
}

/// Most recent provenance row of `day`, if it was ever loaded.
pub fn latest_load(conn: &mut SqliteConnection, day: DayId) -> Result<Option<dbm::DataLoad>, StoreError> {
    use schema::dataload::dsl as L;

    L::dataload
        .filter(L::day_id.eq(day.get()))
        .order(L::id.desc())
        .select(dbm::DataLoad::as_select())
        .first(conn)
        .optional()
        .map_err(StoreError::from)
}

pub fn visits_for_day(conn: &mut SqliteConnection, day: DayId) -> Result<Vec<dbm::Visit>, StoreError> {
    use schema::visit::dsl as V;

    V::visit
        .filter(V::day_id.eq(day.get()))
        .order((V::time_in.asc(), V::id.asc()))
        .select(dbm::Visit::as_select())
        .load(conn)
        .map_err(StoreError::from)
}

pub fn blocks_for_day(conn: &mut SqliteConnection, day: DayId) -> Result<Vec<dbm::Block>, StoreError> {
    use schema::block::dsl as B;

    B::block
        .filter(B::day_id.eq(day.get()))
        .order(B::time_start.asc())
        .select(dbm::Block::as_select())
        .load(conn)
        .map_err(StoreError::from)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::connection::test_connection;
    use crate::db::models::{DayKey, DaySummary};
    use crate::services::days::{delete_day, upsert_day};
    use crate::services::refs::{create_org, create_site};

    fn day(conn: &mut SqliteConnection, date: &str) -> DayId {
        let summary = DaySummary {
            time_open: Some("08:00".to_string()),
            time_closed: Some("18:00".to_string()),
            ..DaySummary::default()
        };
        upsert_day(conn, &DayKey::new("acme", "main", date), &summary).unwrap()
    }

    fn setup() -> SqliteConnection {
        let mut conn = test_connection();
        create_org(&mut conn, "acme", None, &[]).unwrap();
        create_site(&mut conn, "acme", Some("main"), None).unwrap();
        conn
    }

    fn visit(time_in: &str, kind: &str, duration: Option<i32>) -> VisitRecord {
        VisitRecord {
            duration,
            ..VisitRecord::new(time_in, kind)
        }
    }

    fn block(start: &str, bikes: i32) -> BlockRecord {
        BlockRecord {
            time_start: start.to_string(),
            num_regular_at_start: bikes,
            num_bikes_at_start: bikes,
            num_regular_at_end: bikes,
            num_bikes_at_end: bikes,
            num_most_full: bikes,
            time_most_full: Some(start.to_string()),
            ..BlockRecord::default()
        }
    }

    #[test]
    fn end_to_end_scenario() {
        let mut conn = setup();
        let key = DayKey::new("acme", "main", "2024-06-01");
        let id = day(&mut conn, "2024-06-01");
        assert_eq!(replace_visits(&mut conn, id, &[VisitRecord::new("09:15", "R")]).unwrap(), 1);

        let err = upsert_day(&mut conn, &DayKey::new("acme", "main", "2024-13-40"), &DaySummary::default())
            .unwrap_err();
        assert!(err.is_constraint_violation(), "{}", err);

        let stored = crate::services::days::get_day(&mut conn, &key).unwrap().unwrap();
        assert_eq!(stored.time_open.as_deref(), Some("08:00"));
        assert_eq!(stored.time_closed.as_deref(), Some("18:00"));
        let visits = visits_for_day(&mut conn, id).unwrap();
        assert_eq!(visits.len(), 1);
        assert_eq!(visits[0].time_in, "09:15");
    }

    #[test]
    fn replacing_visits_drops_the_previous_set() {
        let mut conn = setup();
        let id = day(&mut conn, "2024-06-01");
        replace_visits(&mut conn, id, &[visit("09:00", "R", Some(30)), visit("09:10", "O", None)]).unwrap();
        replace_visits(&mut conn, id, &[visit("10:00", "O", Some(5))]).unwrap();

        let visits = visits_for_day(&mut conn, id).unwrap();
        assert_eq!(visits.len(), 1);
        assert_eq!(visits[0].bike_type, "O");
        assert_eq!(visits[0].duration, Some(5));
    }

    #[test]
    fn rejected_visit_leaves_prior_set_intact() {
        let mut conn = setup();
        let id = day(&mut conn, "2024-06-01");
        replace_visits(&mut conn, id, &[visit("09:00", "R", None)]).unwrap();

        let err = replace_visits(&mut conn, id, &[visit("10:00", "R", None), visit("10:05", "X", None)]).unwrap_err();
        assert!(err.is_constraint_violation(), "{}", err);
        assert!(err.to_string().contains("acme/main/2024-06-01 #2"), "{}", err);

        let visits = visits_for_day(&mut conn, id).unwrap();
        assert_eq!(visits.len(), 1);
        assert_eq!(visits[0].time_in, "09:00");
    }

    #[test]
    fn bad_visit_times_and_durations_are_rejected() {
        let mut conn = setup();
        let id = day(&mut conn, "2024-06-01");
        for v in [visit("24:30", "R", None), visit("9:15", "R", None), visit("09:15", "R", Some(-5))] {
            assert!(replace_visits(&mut conn, id, &[v]).unwrap_err().is_constraint_violation());
        }
    }

    #[test]
    fn blocks_are_replaced_and_ordered() {
        let mut conn = setup();
        let id = day(&mut conn, "2024-06-01");
        replace_blocks(&mut conn, id, &[block("09:00", 1), block("08:30", 0)]).unwrap();
        let blocks = blocks_for_day(&mut conn, id).unwrap();
        assert_eq!(
            blocks.iter().map(|b| b.time_start.as_str()).collect::<Vec<_>>(),
            vec!["08:30", "09:00"]
        );

        let err = replace_blocks(&mut conn, id, &[block("10:00", 2), block("10:00", 3)]).unwrap_err();
        assert!(err.is_constraint_violation(), "{}", err);
        assert_eq!(blocks_for_day(&mut conn, id).unwrap().len(), 2);
    }

    #[test]
    fn latest_load_is_the_newest_record() {
        let mut conn = setup();
        let id = day(&mut conn, "2024-06-01");
        assert!(latest_load(&mut conn, id).unwrap().is_none());

        record_load(&mut conn, id, "a.json", "aaa", Some("2024-06-01T20:00:00Z")).unwrap();
        record_load(&mut conn, id, "b.json", "bbb", None).unwrap();
        let load = latest_load(&mut conn, id).unwrap().unwrap();
        assert_eq!(load.data_source, "b.json");
        assert_eq!(load.data_fingerprint, "bbb");
        assert!(load.file_timestamp.is_none());
        assert!(load.load_timestamp.ends_with('Z'));
    }

    #[test]
    fn writes_against_a_deleted_day_are_not_found() {
        let mut conn = setup();
        let stale = day(&mut conn, "2024-06-01");
        assert!(delete_day(&mut conn, &DayKey::new("acme", "main", "2024-06-01")).unwrap());

        let not_found = |r: Result<usize, StoreError>| matches!(r, Err(StoreError::NotFound { entity: "day", .. }));
        assert!(not_found(replace_visits(&mut conn, stale, &[])));
        assert!(not_found(replace_visits(&mut conn, stale, &[visit("09:00", "R", None)])));
        assert!(not_found(replace_blocks(&mut conn, stale, &[])));
        assert!(not_found(replace_blocks(&mut conn, stale, &[block("09:00", 1)])));
        let err = record_load(&mut conn, stale, "f.json", "fp", None).unwrap_err();
        assert!(matches!(err, StoreError::NotFound { entity: "day", .. }), "{}", err);
    }

    #[test]
    fn deleting_a_day_cascades_to_its_children_only() {
        let mut conn = setup();
        let gone = day(&mut conn, "2024-06-01");
        let kept = day(&mut conn, "2024-06-02");
        for id in [gone, kept] {
            replace_visits(&mut conn, id, &[visit("09:00", "R", Some(10))]).unwrap();
            replace_blocks(&mut conn, id, &[block("09:00", 1)]).unwrap();
            record_load(&mut conn, id, "f.json", "fp", None).unwrap();
        }

        assert!(delete_day(&mut conn, &DayKey::new("acme", "main", "2024-06-01")).unwrap());

        assert!(visits_for_day(&mut conn, gone).unwrap().is_empty());
        assert!(blocks_for_day(&mut conn, gone).unwrap().is_empty());
        assert!(latest_load(&mut conn, gone).unwrap().is_none());
        assert_eq!(visits_for_day(&mut conn, kept).unwrap().len(), 1);
        assert_eq!(blocks_for_day(&mut conn, kept).unwrap().len(), 1);
        assert!(latest_load(&mut conn, kept).unwrap().is_some());
    }
}
