//! Read-only lookups against the geography snapshot.
//!
//! The snapshot is a SQLite file with two tables, `states(state, state_fips)`
//! and `counties(state, county, county_fips)`, produced offline by
//! [`write_snapshot`] (wired to the CLI `cache` command). The serving path
//! opens it read-only and never mutates it.
//!
//! SQLite connections are not `Sync`, so a `GeoStore` cannot be shared
//! between threads directly; give each serving thread its own handle opened
//! against the same snapshot file.

use std::path::Path;

use rusqlite::{params, Connection, OpenFlags, OptionalExtension};

use crate::error::{CountyViewError, Result};

/// Format a county row key / display label as "County Name, State Name".
pub fn county_label(county: &str, state: &str) -> String {
    format!("{county}, {state}")
}

pub struct GeoStore {
    conn: Connection,
}

impl GeoStore {
    /// Open the snapshot at `path` read-only. Fails if the file does not
    /// exist; run the `cache` command to build one.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        if !path.is_file() {
            return Err(CountyViewError::Config(format!(
                "geography snapshot '{}' not found; run the `cache` command to build it",
                path.display()
            )));
        }
        let conn = Connection::open_with_flags(path, OpenFlags::SQLITE_OPEN_READ_ONLY)?;
        Ok(Self { conn })
    }

    /// State names, in stored order.
    pub fn list_states(&self) -> Result<Vec<String>> {
        let mut stmt = self.conn.prepare("SELECT state FROM states")?;
        let states = stmt
            .query_map([], |row| row.get(0))?
            .collect::<rusqlite::Result<Vec<String>>>()?;
        Ok(states)
    }

    /// County names within `state`, in stored order. An unknown state is a
    /// `NotFound` error rather than an empty list, consistent with the FIPS
    /// resolvers.
    pub fn list_counties(&self, state: &str) -> Result<Vec<String>> {
        self.resolve_state_fips(state)?;
        let mut stmt = self.conn.prepare("SELECT county FROM counties WHERE state = ?1")?;
        let counties = stmt
            .query_map(params![state], |row| row.get(0))?
            .collect::<rusqlite::Result<Vec<String>>>()?;
        Ok(counties)
    }

    /// Choices for the county-selection form: one entry per state, counties
    /// doubled into (value, label) pairs of the "County Name, State Name"
    /// display label. States and counties are sorted alphabetically.
    pub fn all_county_choices(&self) -> Result<Vec<(String, Vec<(String, String)>)>> {
        let mut state_stmt = self.conn.prepare("SELECT state FROM states ORDER BY state")?;
        let states = state_stmt
            .query_map([], |row| row.get(0))?
            .collect::<rusqlite::Result<Vec<String>>>()?;

        let mut county_stmt = self
            .conn
            .prepare("SELECT county FROM counties WHERE state = ?1 ORDER BY county")?;
        let mut choices = Vec::with_capacity(states.len());
        for state in states {
            let mut labels = Vec::new();
            for county in county_stmt.query_map(params![&state], |row| row.get::<_, String>(0))? {
                let label = county_label(&county?, &state);
                labels.push((label.clone(), label));
            }
            choices.push((state, labels));
        }
        Ok(choices)
    }

    /// FIPS code of `state`; `NotFound` if the state is unknown.
    pub fn resolve_state_fips(&self, state: &str) -> Result<String> {
        self.conn
            .query_row(
                "SELECT state_fips FROM states WHERE state = ?1",
                params![state],
                |row| row.get(0),
            )
            .optional()?
            .ok_or_else(|| CountyViewError::NotFound(format!("state '{state}'")))
    }

    /// FIPS code of `county` within `state`. County names are only unique
    /// within a state, so the lookup is always scoped by state; `NotFound`
    /// if the pair is unknown.
    pub fn resolve_county_fips(&self, state: &str, county: &str) -> Result<String> {
        self.conn
            .query_row(
                "SELECT county_fips FROM counties WHERE state = ?1 AND county = ?2",
                params![state, county],
                |row| row.get(0),
            )
            .optional()?
            .ok_or_else(|| CountyViewError::NotFound(format!("county '{county}, {state}'")))
    }
}

/// Write a fresh snapshot to `path`, replacing any previous tables. This is
/// the cache builder's path and the only code that mutates the store; it
/// never runs at serving time.
pub fn write_snapshot<P: AsRef<Path>>(
    path: P,
    states: &[(String, String)],
    counties: &[(String, String, String)],
) -> Result<()> {
    let mut conn = Connection::open(path)?;
    conn.execute_batch(
        "DROP TABLE IF EXISTS states;
         DROP TABLE IF EXISTS counties;
         CREATE TABLE states (state TEXT, state_fips TEXT);
         CREATE TABLE counties (state TEXT, county TEXT, county_fips TEXT);",
    )?;
    let tx = conn.transaction()?;
    {
        let mut insert_state = tx.prepare("INSERT INTO states (state, state_fips) VALUES (?1, ?2)")?;
        let mut insert_county =
            tx.prepare("INSERT INTO counties (state, county, county_fips) VALUES (?1, ?2, ?3)")?;
        for (state, state_fips) in states {
            insert_state.execute(params![state, state_fips])?;
        }
        for (state, county, county_fips) in counties {
            insert_county.execute(params![state, county, county_fips])?;
        }
    }
    tx.commit()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_store() -> (tempfile::TempDir, GeoStore) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("geos.db");
        let states = vec![
            ("Pennsylvania".to_string(), "42".to_string()),
            ("Ohio".to_string(), "39".to_string()),
        ];
        let counties = vec![
            ("Pennsylvania".to_string(), "Butler County".to_string(), "019".to_string()),
            ("Pennsylvania".to_string(), "Allegheny County".to_string(), "003".to_string()),
            ("Ohio".to_string(), "Cuyahoga County".to_string(), "035".to_string()),
        ];
        write_snapshot(&path, &states, &counties).unwrap();
        (dir, GeoStore::open(path).unwrap())
    }

    #[test]
    fn test_open_missing_snapshot() {
        let dir = tempfile::tempdir().unwrap();
        let store = GeoStore::open(dir.path().join("missing.db"));
        assert!(
            matches!(store, Err(CountyViewError::Config(_))),
            "A missing snapshot should be a config error"
        );
    }

    #[test]
    fn test_list_states_in_stored_order() {
        let (_dir, store) = test_store();
        let states = store.list_states().unwrap();
        assert_eq!(states, vec!["Pennsylvania", "Ohio"]);
    }

    #[test]
    fn test_list_counties() {
        let (_dir, store) = test_store();
        let counties = store.list_counties("Ohio").unwrap();
        assert_eq!(counties, vec!["Cuyahoga County"]);

        let unknown = store.list_counties("Narnia");
        assert!(
            matches!(unknown, Err(CountyViewError::NotFound(_))),
            "An unknown state should not list counties"
        );
    }

    #[test]
    fn test_all_county_choices_sorted() {
        let (_dir, store) = test_store();
        let choices = store.all_county_choices().unwrap();
        let states: Vec<&str> = choices.iter().map(|(state, _)| state.as_str()).collect();
        assert_eq!(states, vec!["Ohio", "Pennsylvania"], "States should be alphabetical");

        let (_, pennsylvania) = &choices[1];
        assert_eq!(
            pennsylvania,
            &vec![
                (
                    "Allegheny County, Pennsylvania".to_string(),
                    "Allegheny County, Pennsylvania".to_string()
                ),
                (
                    "Butler County, Pennsylvania".to_string(),
                    "Butler County, Pennsylvania".to_string()
                ),
            ],
            "Counties should be alphabetical within their state"
        );
    }

    #[test]
    fn test_resolve_fips() {
        let (_dir, store) = test_store();
        assert_eq!(store.resolve_state_fips("Pennsylvania").unwrap(), "42");
        assert_eq!(
            store.resolve_county_fips("Pennsylvania", "Allegheny County").unwrap(),
            "003"
        );
    }

    #[test]
    fn test_resolve_unknown_is_not_found() {
        let (_dir, store) = test_store();
        assert!(matches!(
            store.resolve_state_fips("Narnia"),
            Err(CountyViewError::NotFound(_))
        ));
        // County names are scoped by state: Cuyahoga exists, but not in
        // Pennsylvania.
        assert!(matches!(
            store.resolve_county_fips("Pennsylvania", "Cuyahoga County"),
            Err(CountyViewError::NotFound(_))
        ));
    }

    #[test]
    fn test_county_label() {
        assert_eq!(
            county_label("Allegheny County", "Pennsylvania"),
            "Allegheny County, Pennsylvania"
        );
    }
}
