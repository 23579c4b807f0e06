use std::collections::{BTreeSet, HashSet};

use log::debug;
use polars::frame::DataFrame;

use crate::catalog::{VariableCatalog, VariableDefinition};
use crate::census::CensusClient;
use crate::config::Config;
use crate::error::Result;
use crate::geo::GeoStore;

// Re-exports
pub use column_names as COL;
pub use error::CountyViewError;
pub use view::DictView;

// Modules
pub mod catalog;
pub mod census;
pub mod column_names;
pub mod config;
pub mod error;
pub mod expr;
pub mod geo;
pub mod transform;
pub mod view;

/// Type wiring the geography store, variable catalog and census client
/// together into the request-level API.
///
/// Constructed once at process start; the store and catalog are read-only
/// afterwards, so one instance can serve any number of sequential requests.
pub struct CountyView {
    pub geo: GeoStore,
    pub catalog: VariableCatalog,
    pub client: CensusClient,
}

impl CountyView {
    /// Setup a CountyView with default configuration.
    pub fn new() -> Result<Self> {
        Self::new_with_config(Config::default())
    }

    /// Setup a CountyView with custom configuration. Opens the geography
    /// snapshot read-only and loads the variable catalog; either failing is
    /// fatal.
    pub fn new_with_config(config: Config) -> Result<Self> {
        debug!("config: {config:?}");
        let geo = GeoStore::open(&config.db_path)?;
        let catalog = VariableCatalog::load(&config.vars_path)?;
        let client = CensusClient::new(&config)?;
        Ok(Self { geo, catalog, client })
    }

    /// Build the category-grouped view plus its display column names for the
    /// given county and variable-id selections. With no counties selected,
    /// returns the placeholder view.
    pub async fn view_dict(
        &self,
        counties: &[(String, String)],
        selected_ids: &HashSet<String>,
    ) -> Result<(DictView, Vec<String>)> {
        if counties.is_empty() {
            return Ok(view::placeholder_view());
        }
        let defs = self.catalog.resolve_by_ids(selected_ids);
        let formatted = self.build_formatted(counties, &defs).await?;
        let categories = defs.iter().map(|def| def.category.clone()).collect::<Vec<_>>();
        let dict = view::to_dict(&formatted, &categories)?;
        Ok((dict, view::display_column_names(counties)))
    }

    /// Build the flat table (one row per county) for CSV export.
    pub async fn view_table(
        &self,
        counties: &[(String, String)],
        selected_ids: &HashSet<String>,
    ) -> Result<DataFrame> {
        let defs = self.catalog.resolve_by_ids(selected_ids);
        let formatted = self.build_formatted(counties, &defs).await?;
        view::to_flat_table(&formatted)
    }

    async fn build_formatted(
        &self,
        counties: &[(String, String)],
        defs: &[&VariableDefinition],
    ) -> Result<DataFrame> {
        let codes: BTreeSet<String> = defs
            .iter()
            .flat_map(|def| def.vars.iter().cloned())
            .collect();
        let raw = self.client.fetch(counties, &codes, &self.geo).await?;
        transform::transform(&raw, defs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use httpmock::prelude::*;
    use serde_json::json;

    const VARS_CONFIG: &str = r#"[
        {
            "name": "Pct Non-White",
            "vars": ["B02001_001E", "B02001_002E"],
            "definition": "(B02001_001E - B02001_002E) / B02001_001E",
            "category": "Race"
        }
    ]"#;

    fn test_fixture(server: &MockServer) -> (tempfile::TempDir, CountyView) {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("geos.db");
        geo::write_snapshot(
            &db_path,
            &[("Pennsylvania".to_string(), "42".to_string())],
            &[(
                "Pennsylvania".to_string(),
                "Allegheny County".to_string(),
                "003".to_string(),
            )],
        )
        .unwrap();
        let vars_path = dir.path().join("vars.json");
        std::fs::write(&vars_path, VARS_CONFIG).unwrap();

        let config = Config {
            base_url: server.base_url(),
            db_path: db_path.to_string_lossy().into_owned(),
            vars_path: vars_path.to_string_lossy().into_owned(),
            ..Config::default()
        };
        let viewer = CountyView::new_with_config(config).unwrap();
        (dir, viewer)
    }

    #[tokio::test]
    async fn test_view_dict_end_to_end() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(GET).path("/2018/acs/acs5").query_param("in", "state:42");
            then.status(200).json_body(json!([
                ["NAME", "B02001_001E", "B02001_002E", "state", "county"],
                ["Allegheny County, Pennsylvania", "100", "80", "42", "003"]
            ]));
        });

        let (_dir, viewer) = test_fixture(&server);
        let counties = vec![("Pennsylvania".to_string(), "Allegheny County".to_string())];
        let ids: HashSet<String> = ["0".to_string()].into_iter().collect();

        let (dict, colnames) = viewer.view_dict(&counties, &ids).await.unwrap();
        assert_eq!(
            colnames,
            vec!["Column Name", "Allegheny County, Pennsylvania"]
        );
        assert_eq!(
            dict["Race"],
            vec![vec![json!("Pct Non-White"), json!(0.2)]]
        );
    }

    #[tokio::test]
    async fn test_view_table_end_to_end() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(GET).path("/2018/acs/acs5").query_param("in", "state:42");
            then.status(200).json_body(json!([
                ["NAME", "B02001_001E", "B02001_002E", "state", "county"],
                ["Allegheny County, Pennsylvania", "100", "80", "42", "003"]
            ]));
        });

        let (_dir, viewer) = test_fixture(&server);
        let counties = vec![("Pennsylvania".to_string(), "Allegheny County".to_string())];
        let ids: HashSet<String> = ["0".to_string()].into_iter().collect();

        let flat = viewer.view_table(&counties, &ids).await.unwrap();
        assert_eq!(flat.get_column_names(), vec![COL::COUNTY, "Pct Non-White"]);
        assert_eq!(
            flat.column("Pct Non-White").unwrap().f64().unwrap().get(0),
            Some(0.2)
        );
    }

    #[tokio::test]
    async fn test_view_dict_empty_selection_placeholder() {
        let server = MockServer::start();
        let (_dir, viewer) = test_fixture(&server);

        let (dict, colnames) = viewer.view_dict(&[], &HashSet::new()).await.unwrap();
        assert_eq!(colnames, vec!["No column data!"]);
        assert_eq!(dict[""], vec![vec![json!("No row data!")]]);
    }

    #[tokio::test]
    async fn test_county_missing_upstream_is_silently_omitted() {
        // Upstream has data for the state but no row for the requested
        // county: the county is dropped, the view is built over the rows
        // that remain, and the caller sees fewer value columns than column
        // names.
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(GET).path("/2018/acs/acs5").query_param("in", "state:42");
            then.status(200).json_body(json!([
                ["NAME", "B02001_001E", "B02001_002E", "state", "county"],
                ["Butler County, Pennsylvania", "100", "80", "42", "019"]
            ]));
        });

        let (_dir, viewer) = test_fixture(&server);
        let counties = vec![("Pennsylvania".to_string(), "Allegheny County".to_string())];
        let ids: HashSet<String> = ["0".to_string()].into_iter().collect();

        let (dict, colnames) = viewer.view_dict(&counties, &ids).await.unwrap();
        assert_eq!(colnames, vec!["Column Name", "Allegheny County, Pennsylvania"]);
        assert_eq!(
            dict["Race"],
            vec![vec![json!("Pct Non-White")]],
            "The dropped county contributes no value columns"
        );
    }

    #[tokio::test]
    async fn test_upstream_response_missing_variable_is_fatal() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(GET).path("/2018/acs/acs5").query_param("in", "state:42");
            then.status(200).json_body(json!([
                ["NAME", "B02001_001E", "state", "county"],
                ["Allegheny County, Pennsylvania", "100", "42", "003"]
            ]));
        });

        let (_dir, viewer) = test_fixture(&server);
        let counties = vec![("Pennsylvania".to_string(), "Allegheny County".to_string())];
        let ids: HashSet<String> = ["0".to_string()].into_iter().collect();

        let result = viewer.view_dict(&counties, &ids).await;
        assert!(
            matches!(result, Err(CountyViewError::UpstreamQuery(_))),
            "A response without a requested variable must surface, not be masked"
        );
    }
}
