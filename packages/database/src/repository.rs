//! Incident CRUD and dedupe lookups.
//!
//! `duckdb::Connection` is `Send` but not `Sync`, so the repository wraps it
//! in a `Mutex`. Each public method holds the lock for all of its statements,
//! which makes "allocate id, insert, read back" a single unit from the point
//! of view of other callers in this process.

use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use duckdb::Connection;
use wijkagent_incident_models::{Incident, IncidentFilter, NewIncident, normalize_description};

use crate::DbError;
use crate::convert::{RawIncidentRow, SELECT_COLUMNS, format_timestamp, now_local};

/// Access to the `incidents` table.
pub struct IncidentRepository {
    conn: Mutex<Connection>,
}

impl std::fmt::Debug for IncidentRepository {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IncidentRepository").finish_non_exhaustive()
    }
}

impl IncidentRepository {
    /// Opens (or creates) the incident database at `path` and ensures the
    /// schema exists.
    ///
    /// # Errors
    ///
    /// Returns [`DbError`] if the data directory, the connection, or the
    /// schema cannot be created.
    pub fn open(path: &Path) -> Result<Self, DbError> {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            crate::paths::ensure_dir(parent)?;
        }

        log::debug!("Opening incident database at {}", path.display());
        Self::from_connection(Connection::open(path)?)
    }

    /// Opens a fresh in-memory database. Contents are lost when the
    /// repository is dropped.
    ///
    /// # Errors
    ///
    /// Returns [`DbError`] if the connection or schema cannot be created.
    pub fn open_in_memory() -> Result<Self, DbError> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    /// Wraps an existing connection, creating the schema if needed.
    ///
    /// # Errors
    ///
    /// Returns [`DbError`] if schema creation fails.
    pub fn from_connection(conn: Connection) -> Result<Self, DbError> {
        create_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    pub(crate) fn lock(&self) -> Result<MutexGuard<'_, Connection>, DbError> {
        self.conn.lock().map_err(|_| DbError::LockPoisoned)
    }

    /// Stores a new incident, assigning its id and, when unset, its
    /// `created_at`.
    ///
    /// Returns the incident as stored. Timestamps are kept at whole-second
    /// precision. The uid is stored exactly as given; a blank uid is stored
    /// as absent.
    ///
    /// # Errors
    ///
    /// Returns [`DbError`] if the insert fails.
    pub fn add(&self, incident: NewIncident) -> Result<Incident, DbError> {
        let created_at = incident.created_at.unwrap_or_else(now_local);
        let uid = if incident.uid.trim().is_empty() {
            None
        } else {
            Some(incident.uid.as_str())
        };

        let conn = self.lock()?;
        let id: i64 = conn.query_row("SELECT nextval('incidents_id_seq')", [], |row| {
            row.get(0)
        })?;

        conn.execute(
            "INSERT INTO incidents (
                id, uid, incident_type, description, description_key,
                street, house_number, postcode, city, province,
                lat, lng, incident_at, created_at
            ) VALUES (
                ?, ?, ?, ?, ?,
                ?, ?, ?, ?, ?,
                ?, ?, CAST(? AS TIMESTAMP), CAST(? AS TIMESTAMP)
            )",
            duckdb::params![
                id,
                uid,
                incident.incident_type,
                incident.description,
                normalize_description(&incident.description),
                incident.street,
                incident.house_number,
                incident.postcode,
                incident.city,
                incident.province,
                incident.lat,
                incident.lng,
                format_timestamp(&incident.incident_at),
                format_timestamp(&created_at),
            ],
        )?;

        fetch_by_id(&conn, id)?.ok_or_else(|| DbError::Conversion {
            message: format!("incident {id} missing right after insert"),
        })
    }

    /// Returns the incident with the given id.
    ///
    /// # Errors
    ///
    /// Returns [`DbError`] if the query fails.
    pub fn get_by_id(&self, id: i64) -> Result<Option<Incident>, DbError> {
        let conn = self.lock()?;
        fetch_by_id(&conn, id)
    }

    /// Returns all incidents, most recently created first.
    ///
    /// # Errors
    ///
    /// Returns [`DbError`] if the query fails.
    pub fn get_all(&self) -> Result<Vec<Incident>, DbError> {
        self.get_filtered(&IncidentFilter::default())
    }

    /// Returns the incidents matching every set filter, most recently
    /// created first.
    ///
    /// # Errors
    ///
    /// Returns [`DbError`] if the query fails.
    pub fn get_filtered(&self, filter: &IncidentFilter) -> Result<Vec<Incident>, DbError> {
        let mut sql = format!("SELECT {SELECT_COLUMNS} FROM incidents WHERE 1 = 1");
        let mut params: Vec<String> = Vec::new();

        if let Some(from) = &filter.from {
            sql.push_str(" AND incident_at >= CAST(? AS TIMESTAMP)");
            params.push(format_timestamp(from));
        }
        if let Some(to) = &filter.to {
            sql.push_str(" AND incident_at <= CAST(? AS TIMESTAMP)");
            params.push(format_timestamp(to));
        }
        if let Some(incident_type) = filter.type_filter() {
            sql.push_str(" AND incident_type = ?");
            params.push(incident_type.to_string());
        }
        if let Some(city) = filter.city_filter() {
            sql.push_str(" AND city = ?");
            params.push(city.to_string());
        }
        sql.push_str(" ORDER BY created_at DESC, id DESC");

        let conn = self.lock()?;
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt
            .query_map(duckdb::params_from_iter(params.iter()), RawIncidentRow::from_row)?
            .collect::<Result<Vec<_>, _>>()?;

        rows.into_iter().map(RawIncidentRow::into_incident).collect()
    }

    /// Overwrites every mutable field of the incident with `incident.id`.
    ///
    /// `uid` and `created_at` are never changed. Returns `None` when no
    /// incident with that id exists.
    ///
    /// # Errors
    ///
    /// Returns [`DbError`] if the update fails.
    pub fn update(&self, incident: &Incident) -> Result<Option<Incident>, DbError> {
        let conn = self.lock()?;
        let rows = conn.execute(
            "UPDATE incidents SET
                incident_type = ?,
                description = ?,
                description_key = ?,
                street = ?,
                house_number = ?,
                postcode = ?,
                city = ?,
                province = ?,
                lat = ?,
                lng = ?,
                incident_at = CAST(? AS TIMESTAMP)
             WHERE id = ?",
            duckdb::params![
                incident.incident_type,
                incident.description,
                incident.description_key(),
                incident.street,
                incident.house_number,
                incident.postcode,
                incident.city,
                incident.province,
                incident.lat,
                incident.lng,
                format_timestamp(&incident.incident_at),
                incident.id,
            ],
        )?;

        if rows == 0 {
            log::debug!("Update skipped: incident {} not found", incident.id);
            return Ok(None);
        }

        fetch_by_id(&conn, incident.id)
    }

    /// Deletes the incident with the given id. Returns whether a row existed.
    ///
    /// # Errors
    ///
    /// Returns [`DbError`] if the delete fails.
    pub fn delete(&self, id: i64) -> Result<bool, DbError> {
        let conn = self.lock()?;
        let rows = conn.execute("DELETE FROM incidents WHERE id = ?", [id])?;
        Ok(rows > 0)
    }

    /// Whether an incident with exactly this external uid is stored. The
    /// comparison is case- and whitespace-sensitive. A blank uid never
    /// matches.
    ///
    /// # Errors
    ///
    /// Returns [`DbError`] if the query fails.
    pub fn exists_by_uid(&self, uid: &str) -> Result<bool, DbError> {
        if uid.trim().is_empty() {
            return Ok(false);
        }

        let conn = self.lock()?;
        let exists: bool = conn.query_row(
            "SELECT EXISTS (SELECT 1 FROM incidents WHERE uid = ?)",
            [uid],
            |row| row.get(0),
        )?;
        Ok(exists)
    }

    /// Whether an incident with the same trimmed, case-folded description is
    /// stored. An empty description never matches.
    ///
    /// # Errors
    ///
    /// Returns [`DbError`] if the query fails.
    pub fn exists_by_description(&self, description: &str) -> Result<bool, DbError> {
        let key = normalize_description(description);
        if key.is_empty() {
            return Ok(false);
        }

        let conn = self.lock()?;
        let exists: bool = conn.query_row(
            "SELECT EXISTS (SELECT 1 FROM incidents WHERE description_key = ?)",
            [key],
            |row| row.get(0),
        )?;
        Ok(exists)
    }
}

fn create_schema(conn: &Connection) -> Result<(), DbError> {
    conn.execute_batch(
        "CREATE SEQUENCE IF NOT EXISTS incidents_id_seq START 1;

        CREATE TABLE IF NOT EXISTS incidents (
            id BIGINT NOT NULL PRIMARY KEY,
            uid TEXT,
            incident_type TEXT NOT NULL DEFAULT '',
            description TEXT NOT NULL DEFAULT '',
            description_key TEXT NOT NULL DEFAULT '',
            street TEXT NOT NULL DEFAULT '',
            house_number TEXT NOT NULL DEFAULT '',
            postcode TEXT NOT NULL DEFAULT '',
            city TEXT NOT NULL DEFAULT '',
            province TEXT NOT NULL DEFAULT '',
            lat DOUBLE NOT NULL,
            lng DOUBLE NOT NULL,
            incident_at TIMESTAMP NOT NULL,
            created_at TIMESTAMP NOT NULL
        );",
    )?;

    Ok(())
}

pub(crate) fn fetch_by_id(conn: &Connection, id: i64) -> Result<Option<Incident>, DbError> {
    let mut stmt = conn.prepare(&format!("SELECT {SELECT_COLUMNS} FROM incidents WHERE id = ?"))?;
    match stmt.query_row([id], RawIncidentRow::from_row) {
        Ok(raw) => raw.into_incident().map(Some),
        Err(duckdb::Error::QueryReturnedNoRows) => Ok(None),
        Err(e) => Err(DbError::DuckDb(e)),
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use chrono::{NaiveDate, NaiveDateTime};

    use super::*;

    pub fn at(y: i32, m: u32, d: u32, h: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(y, m, d)
            .and_then(|date| date.and_hms_opt(h, 0, 0))
            .unwrap()
    }

    pub fn new_incident(uid: &str, incident_type: &str, city: &str, at: NaiveDateTime) -> NewIncident {
        NewIncident {
            uid: uid.to_string(),
            incident_type: incident_type.to_string(),
            description: format!("{incident_type} in {city} ({uid})"),
            city: city.to_string(),
            lat: 52.1,
            lng: 5.1,
            incident_at: at,
            ..NewIncident::default()
        }
    }

    #[test]
    fn add_assigns_increasing_ids_and_created_at() {
        let repo = IncidentRepository::open_in_memory().unwrap();
        let first = repo
            .add(new_incident("A1", "Diefstal", "Utrecht", at(2025, 1, 1, 10)))
            .unwrap();
        let second = repo
            .add(new_incident("A2", "Overlast", "Utrecht", at(2025, 1, 1, 11)))
            .unwrap();

        assert!(second.id > first.id);
        assert_eq!(first.uid, "A1");
        assert_eq!(first.incident_at, at(2025, 1, 1, 10));
        assert!(first.created_at <= second.created_at);
    }

    #[test]
    fn add_keeps_explicit_created_at() {
        let repo = IncidentRepository::open_in_memory().unwrap();
        let created = at(2024, 12, 31, 23);
        let stored = repo
            .add(NewIncident {
                created_at: Some(created),
                ..new_incident("A1", "Diefstal", "Utrecht", at(2024, 12, 31, 22))
            })
            .unwrap();
        assert_eq!(stored.created_at, created);
    }

    #[test]
    fn get_by_id_returns_none_for_missing() {
        let repo = IncidentRepository::open_in_memory().unwrap();
        assert!(repo.get_by_id(42).unwrap().is_none());
    }

    #[test]
    fn get_all_is_newest_created_first() {
        let repo = IncidentRepository::open_in_memory().unwrap();
        for (uid, hour) in [("A", 8), ("B", 12), ("C", 10)] {
            repo.add(NewIncident {
                created_at: Some(at(2025, 2, 1, hour)),
                ..new_incident(uid, "Diefstal", "Utrecht", at(2025, 2, 1, 1))
            })
            .unwrap();
        }

        let uids: Vec<String> = repo.get_all().unwrap().into_iter().map(|i| i.uid).collect();
        assert_eq!(uids, vec!["B", "C", "A"]);
    }

    #[test]
    fn filters_are_conjunctive() {
        let repo = IncidentRepository::open_in_memory().unwrap();
        repo.add(new_incident("A1", "Diefstal", "Amsterdam", at(2025, 1, 10, 9)))
            .unwrap();
        repo.add(new_incident("A2", "Overlast", "Amsterdam", at(2025, 1, 11, 9)))
            .unwrap();
        repo.add(new_incident("A3", "Diefstal", "Rotterdam", at(2025, 1, 12, 9)))
            .unwrap();
        repo.add(new_incident("A4", "Diefstal", "Amsterdam", at(2025, 1, 20, 9)))
            .unwrap();

        let by_type = repo
            .get_filtered(&IncidentFilter {
                incident_type: Some("Diefstal".to_string()),
                ..IncidentFilter::default()
            })
            .unwrap();
        assert_eq!(by_type.len(), 3);

        let combined = repo
            .get_filtered(&IncidentFilter {
                from: Some(at(2025, 1, 10, 9)),
                to: Some(at(2025, 1, 15, 0)),
                incident_type: Some("Diefstal".to_string()),
                city: Some("Amsterdam".to_string()),
            })
            .unwrap();
        assert_eq!(combined.len(), 1);
        assert_eq!(combined[0].uid, "A1");
    }

    #[test]
    fn blank_filters_match_everything() {
        let repo = IncidentRepository::open_in_memory().unwrap();
        repo.add(new_incident("A1", "Diefstal", "Amsterdam", at(2025, 1, 10, 9)))
            .unwrap();
        repo.add(new_incident("A2", "Overlast", "Rotterdam", at(2025, 1, 11, 9)))
            .unwrap();

        let all = repo
            .get_filtered(&IncidentFilter {
                incident_type: Some(" ".to_string()),
                city: Some(String::new()),
                ..IncidentFilter::default()
            })
            .unwrap();
        assert_eq!(all.len(), 2);
    }

    #[test]
    fn update_overwrites_mutable_fields_only() {
        let repo = IncidentRepository::open_in_memory().unwrap();
        let stored = repo
            .add(NewIncident {
                description: "Oude beschrijving".to_string(),
                street: "Kalverstraat".to_string(),
                ..new_incident("A1", "Diefstal", "Amsterdam", at(2025, 1, 10, 9))
            })
            .unwrap();

        let mut edited = stored.clone();
        edited.description = "Nieuwe beschrijving".to_string();
        edited.street = "Damrak".to_string();
        edited.uid = "CHANGED".to_string();
        edited.created_at = at(2000, 1, 1, 0);

        let updated = repo.update(&edited).unwrap().unwrap();
        assert_eq!(updated.id, stored.id);
        assert_eq!(updated.description, "Nieuwe beschrijving");
        assert_eq!(updated.street, "Damrak");
        assert_eq!(updated.uid, "A1");
        assert_eq!(updated.created_at, stored.created_at);

        assert!(repo.exists_by_description("nieuwe BESCHRIJVING").unwrap());
        assert!(!repo.exists_by_description("Oude beschrijving").unwrap());
    }

    #[test]
    fn update_missing_returns_none() {
        let repo = IncidentRepository::open_in_memory().unwrap();
        let stored = repo
            .add(new_incident("A1", "Diefstal", "Amsterdam", at(2025, 1, 10, 9)))
            .unwrap();
        let ghost = Incident {
            id: stored.id + 100,
            ..stored
        };
        assert!(repo.update(&ghost).unwrap().is_none());
    }

    #[test]
    fn delete_reports_whether_row_existed() {
        let repo = IncidentRepository::open_in_memory().unwrap();
        let stored = repo
            .add(new_incident("A1", "Diefstal", "Amsterdam", at(2025, 1, 10, 9)))
            .unwrap();

        assert!(repo.delete(stored.id).unwrap());
        assert!(!repo.delete(stored.id).unwrap());
        assert!(repo.get_by_id(stored.id).unwrap().is_none());
    }

    #[test]
    fn dedupe_lookups() {
        let repo = IncidentRepository::open_in_memory().unwrap();
        repo.add(NewIncident {
            description: "  Diefstal Fiets ".to_string(),
            ..new_incident("A1", "Diefstal", "Utrecht", at(2025, 1, 1, 10))
        })
        .unwrap();

        assert!(repo.exists_by_uid("A1").unwrap());
        assert!(!repo.exists_by_uid("a1").unwrap());
        assert!(!repo.exists_by_uid("").unwrap());
        assert!(repo.exists_by_description("diefstal fiets").unwrap());
        assert!(repo.exists_by_description("DIEFSTAL FIETS  ").unwrap());
        assert!(!repo.exists_by_description("").unwrap());
    }

    #[test]
    fn uid_is_stored_and_matched_exactly() {
        let repo = IncidentRepository::open_in_memory().unwrap();
        let padded = repo
            .add(new_incident("A1 ", "Diefstal", "Utrecht", at(2025, 1, 1, 10)))
            .unwrap();
        assert_eq!(padded.uid, "A1 ");

        assert!(repo.exists_by_uid("A1 ").unwrap());
        assert!(!repo.exists_by_uid("A1").unwrap());
        assert!(!repo.exists_by_uid(" A1").unwrap());

        repo.add(new_incident("A1", "Diefstal", "Utrecht", at(2025, 1, 1, 11)))
            .unwrap();
        assert!(repo.exists_by_uid("A1").unwrap());
        assert_eq!(repo.get_all().unwrap().len(), 2);
    }

    #[test]
    fn blank_uid_is_stored_as_absent() {
        let repo = IncidentRepository::open_in_memory().unwrap();
        let stored = repo
            .add(new_incident("   ", "Overlast", "Utrecht", at(2025, 1, 1, 10)))
            .unwrap();
        assert_eq!(stored.uid, "");
        assert!(!repo.exists_by_uid("   ").unwrap());
    }

    #[test]
    fn manual_incidents_without_uid_can_coexist() {
        let repo = IncidentRepository::open_in_memory().unwrap();
        let first = repo
            .add(new_incident("", "Overlast", "Utrecht", at(2025, 1, 1, 10)))
            .unwrap();
        let second = repo
            .add(new_incident("", "Overlast", "Utrecht", at(2025, 1, 1, 11)))
            .unwrap();
        assert_eq!(first.uid, "");
        assert_ne!(first.id, second.id);
        assert!(!repo.exists_by_uid("").unwrap());
    }

    #[test]
    fn reopens_file_database() {
        let dir = std::env::temp_dir().join(format!("wijkagent-db-test-{}", std::process::id()));
        let path = dir.join("incidents.duckdb");
        let _ = std::fs::remove_file(&path);

        {
            let repo = IncidentRepository::open(&path).unwrap();
            repo.add(new_incident("A1", "Diefstal", "Utrecht", at(2025, 1, 1, 10)))
                .unwrap();
        }

        let repo = IncidentRepository::open(&path).unwrap();
        assert!(repo.exists_by_uid("A1").unwrap());
        let next = repo
            .add(new_incident("A2", "Diefstal", "Utrecht", at(2025, 1, 1, 11)))
            .unwrap();
        assert!(next.id > 1);

        drop(repo);
        let _ = std::fs::remove_dir_all(&dir);
    }
}
