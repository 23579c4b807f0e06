use serde::{Deserialize, Serialize};

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct Config {
    /// Base URL of the Census data API.
    pub base_url: String,
    /// ACS survey name, e.g. "acs5" or "acs1".
    pub survey: String,
    pub year: u16,
    /// data.census.gov API key. Optional; the API serves a small request
    /// volume without one.
    pub api_key: Option<String>,
    /// Path of the geography snapshot built by the `cache` command.
    pub db_path: String,
    /// Path of the variable config document.
    pub vars_path: String,
    /// Number of concurrent upstream query jobs.
    pub fetch_workers: usize,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            base_url: "https://api.census.gov/data".into(),
            survey: "acs5".into(),
            year: 2018,
            api_key: None,
            db_path: "geos.db".into(),
            vars_path: "vars.json".into(),
            fetch_workers: 4,
        }
    }
}
