//! Diesel model structs for bike parking reference data, days and their
//! child rows, plus the input records accepted by the store services.
//!
//! Internal integer ids never leave the crate: row structs skip them when
//! serialized and days are addressed through [`DayKey`] or the opaque
//! [`DayId`].

use core::fmt;
use diesel::prelude::*;
use serde::{Deserialize, Serialize};

use crate::schema;

/// Site handle used by organizations that do not subdivide by location.
pub const UNSPECIFIED_SITE: &str = "unspecified";

pub mod bike_type {
    pub const REGULAR: &str = "R";
    pub const OVERSIZE: &str = "O";
}

pub mod load_source {
    pub const SYNTHETIC: &str = "synthetic";
}

/// Opaque handle to a stored day, only meaningful for the connection that
/// produced it.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct DayId(i32);

impl DayId {
    pub(crate) fn new(id: i32) -> Self {
        DayId(id)
    }

    pub(crate) fn get(self) -> i32 {
        self.0
    }
}

/// External identity of a day: organization handle, site handle and date.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DayKey {
    pub org: String,
    pub site: String,
    pub date: String,
}

impl DayKey {
    pub fn new(org: impl Into<String>, site: impl Into<String>, date: impl Into<String>) -> Self {
        DayKey {
            org: org.into(),
            site: site.into(),
            date: date.into(),
        }
    }
}

impl fmt::Display for DayKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.org, self.site, self.date)
    }
}

#[derive(Debug, Clone, Queryable, Identifiable, Selectable, Serialize)]
#[diesel(table_name = schema::org)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct Org {
    #[serde(skip_serializing)]
    pub id: i32,
    pub org_handle: String,
    pub org_name: Option<String>,
    pub can_view_orgs: Option<String>,
}

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = schema::org)]
pub struct NewOrg {
    pub org_handle: String,
    pub org_name: Option<String>,
    pub can_view_orgs: Option<String>,
}

#[derive(Debug, Clone, Queryable, Identifiable, Associations, Selectable, Serialize)]
#[diesel(table_name = schema::site)]
#[diesel(belongs_to(Org))]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct Site {
    #[serde(skip_serializing)]
    pub id: i32,
    #[serde(skip_serializing)]
    pub org_id: i32,
    pub site_handle: String,
    pub site_name: Option<String>,
}

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = schema::site)]
pub struct NewSite {
    pub org_id: i32,
    pub site_handle: String,
    pub site_name: Option<String>,
}

#[derive(Debug, Clone, Queryable, Identifiable, Associations, Selectable, Serialize)]
#[diesel(table_name = schema::day)]
#[diesel(belongs_to(Org))]
#[diesel(belongs_to(Site))]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct Day {
    #[serde(skip_serializing)]
    pub id: i32,
    #[serde(skip_serializing)]
    pub org_id: i32,
    #[serde(skip_serializing)]
    pub site_id: i32,
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
}

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = schema::day)]
pub struct NewDay {
    pub org_id: i32,
    pub site_id: i32,
    pub date: String,
    pub time_open: Option<String>,
    pub time_closed: Option<String>,
    pub num_parked_regular: Option<i32>,
    pub num_parked_oversize: Option<i32>,
    pub num_parked_combined: Option<i32>,
    pub num_registrations: Option<i32>,
}

/// Loader-supplied summary fields of a day. Weather is kept separately.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DaySummary {
    pub time_open: Option<String>,
    pub time_closed: Option<String>,
    pub num_parked_regular: Option<i32>,
    pub num_parked_oversize: Option<i32>,
    pub num_parked_combined: Option<i32>,
    pub num_registrations: Option<i32>,
}

/// Externally sourced weather for a day. Any field may be unknown.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Weather {
    pub max_temperature: Option<f64>,
    pub precipitation: Option<f64>,
    pub dusk: Option<String>,
}

#[derive(Debug, Clone, Queryable, Identifiable, Associations, Selectable, Serialize)]
#[diesel(table_name = schema::visit)]
#[diesel(belongs_to(Day))]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct Visit {
    #[serde(skip_serializing)]
    pub id: i32,
    #[serde(skip_serializing)]
    pub day_id: i32,
    pub time_in: String,
    pub duration: Option<i32>,
    pub bike_type: String,
    pub bike_id: Option<String>,
}

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = schema::visit)]
pub struct NewVisit<'a> {
    pub day_id: i32,
    pub time_in: &'a str,
    pub duration: Option<i32>,
    pub bike_type: &'a str,
    pub bike_id: Option<&'a str>,
}

/// One visit as handed to `replace_visits`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VisitRecord {
    pub time_in: String,
    pub duration: Option<i32>,
    pub bike_type: String,
    pub bike_id: Option<String>,
}

impl VisitRecord {
    pub fn new(time_in: impl Into<String>, bike_type: impl Into<String>) -> Self {
        VisitRecord {
            time_in: time_in.into(),
            duration: None,
            bike_type: bike_type.into(),
            bike_id: None,
        }
    }

    pub fn is_oversize(&self) -> bool {
        self.bike_type == bike_type::OVERSIZE
    }
}

#[derive(Debug, Clone, Queryable, Identifiable, Associations, Selectable, Serialize)]
#[diesel(table_name = schema::block)]
#[diesel(belongs_to(Day))]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct Block {
    #[serde(skip_serializing)]
    pub id: i32,
    #[serde(skip_serializing)]
    pub day_id: i32,
    pub time_start: String,
    pub num_regular_at_start: i32,
    pub num_oversize_at_start: i32,
    pub num_regular_at_end: i32,
    pub num_oversize_at_end: i32,
    pub num_bikes_at_start: i32,
    pub num_bikes_at_end: i32,
    pub num_most_full: i32,
    pub time_most_full: Option<String>,
}

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = schema::block)]
pub struct NewBlock<'a> {
    pub day_id: i32,
    pub time_start: &'a str,
    pub num_regular_at_start: i32,
    pub num_oversize_at_start: i32,
    pub num_regular_at_end: i32,
    pub num_oversize_at_end: i32,
    pub num_bikes_at_start: i32,
    pub num_bikes_at_end: i32,
    pub num_most_full: i32,
    pub time_most_full: Option<&'a str>,
}

/// Occupancy of one half-hour window, as handed to `replace_blocks`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BlockRecord {
    pub time_start: String,
    pub num_regular_at_start: i32,
    pub num_oversize_at_start: i32,
    pub num_regular_at_end: i32,
    pub num_oversize_at_end: i32,
    pub num_bikes_at_start: i32,
    pub num_bikes_at_end: i32,
    pub num_most_full: i32,
    pub time_most_full: Option<String>,
}

#[derive(Debug, Clone, Queryable, Identifiable, Associations, Selectable, Serialize)]
#[diesel(table_name = schema::dataload)]
#[diesel(belongs_to(Day))]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct DataLoad {
    #[serde(skip_serializing)]
    pub id: i32,
    #[serde(skip_serializing)]
    pub day_id: i32,
    pub data_source: String,
    pub data_fingerprint: String,
    pub file_timestamp: Option<String>,
    pub load_timestamp: String,
}

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = schema::dataload)]
pub struct NewDataLoad<'a> {
    pub day_id: i32,
    pub data_source: &'a str,
    pub data_fingerprint: &'a str,
    pub file_timestamp: Option<&'a str>,
    pub load_timestamp: String,
}
