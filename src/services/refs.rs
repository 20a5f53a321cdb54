//! Organizations, sites and the visibility rule between organizations.

use crate::db::models as dbm;
use crate::error::StoreError;
use crate::schema;
use crate::utils::split_handles;
use diesel::prelude::*;
use diesel::SqliteConnection;
use log::{debug, info, warn};
use std::collections::BTreeSet;

pub fn create_org(
    conn: &mut SqliteConnection,
    handle: &str,
    name: Option<&str>,
    can_view: &[String],
) -> Result<(), StoreError> {
    use schema::org::dsl as O;

    let handle = handle.trim();
    if handle.is_empty() {
        return Err(StoreError::constraint("org", "''", "org handle must not be empty"));
    }
    let new_row = dbm::NewOrg {
        org_handle: handle.to_string(),
        org_name: name.map(str::to_string),
        can_view_orgs: join_handles(can_view),
    };
    conn.exclusive_transaction(|conn| {
        diesel::insert_into(O::org)
            .values(&new_row)
            .execute(conn)
            .map_err(|e| StoreError::from_diesel("org", handle, e))
    })?;
    info!("Refs: created org {}", handle);
    Ok(())
}

/// Replace the list of organizations `handle` may read besides itself.
pub fn set_visibility(conn: &mut SqliteConnection, handle: &str, can_view: &[String]) -> Result<(), StoreError> {
    use schema::org::dsl as O;

    let updated = conn.exclusive_transaction(|conn| {
        diesel::update(O::org.filter(O::org_handle.eq(handle)))
            .set(O::can_view_orgs.eq(join_handles(can_view)))
            .execute(conn)
            .map_err(|e| StoreError::from_diesel("org", handle, e))
    })?;
    if updated == 0 {
        return Err(StoreError::not_found("org", handle));
    }
    info!("Refs: org {} may now view [{}]", handle, can_view.join(", "));
    Ok(())
}

pub fn create_site(
    conn: &mut SqliteConnection,
    org_handle: &str,
    site_handle: Option<&str>,
    name: Option<&str>,
) -> Result<(), StoreError> {
    use schema::site::dsl as S;

    let site_handle = site_handle
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .unwrap_or(dbm::UNSPECIFIED_SITE);
    let key = format!("{}/{}", org_handle, site_handle);
    conn.exclusive_transaction(|conn| {
        let org = find_org(conn, org_handle)?.ok_or_else(|| StoreError::not_found("org", org_handle))?;
        let new_row = dbm::NewSite {
            org_id: org.id,
            site_handle: site_handle.to_string(),
            site_name: name.map(str::to_string),
        };
        diesel::insert_into(S::site)
            .values(&new_row)
            .execute(conn)
            .map_err(|e| StoreError::from_diesel("site", key.as_str(), e))
    })?;
    info!("Refs: created site {}", key);
    Ok(())
}

pub fn find_org(conn: &mut SqliteConnection, handle: &str) -> Result<Option<dbm::Org>, StoreError> {
    use schema::org::dsl as O;

    O::org
        .filter(O::org_handle.eq(handle))
        .select(dbm::Org::as_select())
        .first(conn)
        .optional()
        .map_err(|e| StoreError::from_diesel("org", handle, e))
}

/// Resolve org and site handles to their rows.
pub(crate) fn resolve_site(
    conn: &mut SqliteConnection,
    org_handle: &str,
    site_handle: &str,
) -> Result<(dbm::Org, dbm::Site), StoreError> {
    use schema::site::dsl as S;

    let org = find_org(conn, org_handle)?.ok_or_else(|| StoreError::not_found("org", org_handle))?;
    let key = format!("{}/{}", org_handle, site_handle);
    let site = S::site
        .filter(S::org_id.eq(org.id).and(S::site_handle.eq(site_handle)))
        .select(dbm::Site::as_select())
        .first(conn)
        .optional()
        .map_err(|e| StoreError::from_diesel("site", key.as_str(), e))?
        .ok_or_else(|| StoreError::not_found("site", key))?;
    Ok((org, site))
}

/// Handles of every organization whose data `handle` may read: itself plus
/// each existing organization named in its `can_view_orgs`. One hop only; a
/// peer's own list is not followed.
pub fn visible_orgs(conn: &mut SqliteConnection, handle: &str) -> Result<BTreeSet<String>, StoreError> {
    Ok(visible_org_rows(conn, handle)?
        .into_iter()
        .map(|o| o.org_handle)
        .collect())
}

pub(crate) fn visible_org_rows(conn: &mut SqliteConnection, handle: &str) -> Result<Vec<dbm::Org>, StoreError> {
    use schema::org::dsl as O;

    let me = find_org(conn, handle)?.ok_or_else(|| StoreError::not_found("org", handle))?;
    let listed = me.can_view_orgs.as_deref().map(split_handles).unwrap_or_default();
    let peers: Vec<dbm::Org> = if listed.is_empty() {
        Vec::new()
    } else {
        O::org
            .filter(O::org_handle.eq_any(listed.clone()))
            .filter(O::id.ne(me.id))
            .select(dbm::Org::as_select())
            .load(conn)
            .map_err(|e| StoreError::from_diesel("org", handle, e))?
    };
    for wanted in &listed {
        if wanted != &me.org_handle && !peers.iter().any(|p| &p.org_handle == wanted) {
            warn!("Refs: org {} lists unknown org {} in can_view_orgs", handle, wanted);
        }
    }
    debug!("Refs: org {} sees {} peer org(s)", handle, peers.len());

    let mut rows = Vec::with_capacity(peers.len() + 1);
    rows.push(me);
    rows.extend(peers);
    Ok(rows)
}

fn join_handles(handles: &[String]) -> Option<String> {
    let cleaned = handles
        .iter()
        .flat_map(|h| split_handles(h))
        .collect::<Vec<_>>();
    if cleaned.is_empty() { None } else { Some(cleaned.join(",")) }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::connection::test_connection;

    fn set(items: &[&str]) -> BTreeSet<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn org_without_peers_sees_only_itself() {
        let mut conn = test_connection();
        create_org(&mut conn, "acme", Some("Acme Valet"), &[]).unwrap();
        create_org(&mut conn, "other", None, &[]).unwrap();
        assert_eq!(visible_orgs(&mut conn, "acme").unwrap(), set(&["acme"]));
    }

    #[test]
    fn listed_peers_are_visible_and_others_are_not() {
        let mut conn = test_connection();
        create_org(&mut conn, "a", None, &["b".to_string()]).unwrap();
        create_org(&mut conn, "b", None, &["c".to_string()]).unwrap();
        create_org(&mut conn, "c", None, &[]).unwrap();

        let seen = visible_orgs(&mut conn, "a").unwrap();
        assert_eq!(seen, set(&["a", "b"]));
        assert!(!seen.contains("c"), "visibility must not be transitive");
        assert_eq!(visible_orgs(&mut conn, "b").unwrap(), set(&["b", "c"]));
    }

    #[test]
    fn unknown_and_self_entries_are_ignored() {
        let mut conn = test_connection();
        create_org(&mut conn, "a", None, &["a, ghost".to_string()]).unwrap();
        assert_eq!(visible_orgs(&mut conn, "a").unwrap(), set(&["a"]));
    }

    #[test]
    fn set_visibility_replaces_the_list() {
        let mut conn = test_connection();
        create_org(&mut conn, "a", None, &["b".to_string()]).unwrap();
        create_org(&mut conn, "b", None, &[]).unwrap();
        create_org(&mut conn, "c", None, &[]).unwrap();

        set_visibility(&mut conn, "a", &["c".to_string()]).unwrap();
        assert_eq!(visible_orgs(&mut conn, "a").unwrap(), set(&["a", "c"]));

        set_visibility(&mut conn, "a", &[]).unwrap();
        assert_eq!(visible_orgs(&mut conn, "a").unwrap(), set(&["a"]));

        let err = set_visibility(&mut conn, "nobody", &[]).unwrap_err();
        assert!(matches!(err, StoreError::NotFound { .. }), "{}", err);
    }

    #[test]
    fn unknown_org_has_no_visibility() {
        let mut conn = test_connection();
        let err = visible_orgs(&mut conn, "nobody").unwrap_err();
        assert!(matches!(err, StoreError::NotFound { entity: "org", .. }), "{}", err);
    }

    #[test]
    fn duplicate_handles_are_rejected() {
        let mut conn = test_connection();
        create_org(&mut conn, "acme", None, &[]).unwrap();
        assert!(create_org(&mut conn, "acme", None, &[]).unwrap_err().is_constraint_violation());

        create_site(&mut conn, "acme", Some("main"), None).unwrap();
        assert!(create_site(&mut conn, "acme", Some("main"), None).unwrap_err().is_constraint_violation());
    }

    #[test]
    fn site_handle_defaults_to_unspecified() {
        let mut conn = test_connection();
        create_org(&mut conn, "acme", None, &[]).unwrap();
        create_site(&mut conn, "acme", None, None).unwrap();
        let (_, site) = resolve_site(&mut conn, "acme", dbm::UNSPECIFIED_SITE).unwrap();
        assert_eq!(site.site_handle, "unspecified");
    }

    #[test]
    fn same_site_handle_may_exist_under_two_orgs() {
        let mut conn = test_connection();
        create_org(&mut conn, "a", None, &[]).unwrap();
        create_org(&mut conn, "b", None, &[]).unwrap();
        create_site(&mut conn, "a", Some("main"), None).unwrap();
        create_site(&mut conn, "b", Some("main"), None).unwrap();
        let err = create_site(&mut conn, "ghost", Some("main"), None).unwrap_err();
        assert!(matches!(err, StoreError::NotFound { entity: "org", .. }), "{}", err);
    }
}
