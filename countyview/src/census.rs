//! Queries against the Census ACS data API.
//!
//! The upstream API cannot cheaply fetch an arbitrary county subset, and a
//! single query may only touch one table type. Each query job therefore
//! over-fetches every county of one state for one table type; the job
//! results are merged and filtered locally afterwards.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::time::Duration;

use futures::stream::{self, StreamExt};
use itertools::Itertools;
use log::{debug, info, warn};
use polars::prelude::{
    concat, DataFrame, DataFrameJoinOps, IdxCa, IntoLazy, JoinArgs, JoinCoalesce, JoinType,
    LazyFrame, NamedFrom, Series, UnionArgs,
};
use serde_json::Value;

use crate::config::Config;
use crate::error::{CountyViewError, Result};
use crate::geo::{county_label, GeoStore};
use crate::COL;

const DEFAULT_FETCH_WORKERS: usize = 4;
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Upstream table types. Each type lives under its own URL path and must be
/// queried independently.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum TableType {
    Detail,
    Subject,
    DataProfile,
    ComparisonProfile,
}

impl TableType {
    /// Classify a variable code by its table prefix. The two-letter prefixes
    /// are checked first so `DP...` never classifies as a detail table.
    pub fn from_code(code: &str) -> Option<Self> {
        if code.starts_with("DP") {
            Some(Self::DataProfile)
        } else if code.starts_with("CP") {
            Some(Self::ComparisonProfile)
        } else if code.starts_with('S') {
            Some(Self::Subject)
        } else if code.starts_with('B') {
            Some(Self::Detail)
        } else {
            None
        }
    }

    fn route_suffix(&self) -> &'static str {
        match self {
            Self::Detail => "",
            Self::Subject => "/subject",
            Self::DataProfile => "/profile",
            Self::ComparisonProfile => "/cprofile",
        }
    }
}

/// One upstream query: all counties of one state, for the variables of one
/// table type.
#[derive(Debug, Clone)]
struct QueryJob {
    state_fips: String,
    table_type: TableType,
    codes: Vec<String>,
}

pub struct CensusClient {
    http: reqwest::Client,
    base_url: String,
    survey: String,
    year: u16,
    api_key: Option<String>,
    workers: usize,
}

impl CensusClient {
    pub fn new(config: &Config) -> Result<Self> {
        let http = reqwest::Client::builder().timeout(REQUEST_TIMEOUT).build()?;
        Ok(Self {
            http,
            base_url: config.base_url.clone(),
            survey: config.survey.clone(),
            year: config.year,
            api_key: config.api_key.clone(),
            workers: if config.fetch_workers == 0 {
                DEFAULT_FETCH_WORKERS
            } else {
                config.fetch_workers
            },
        })
    }

    /// Fetch the raw county table for the given counties and variable codes:
    /// one query job per (state, table type), merged per state by outer join
    /// on the county key, concatenated across states and filtered down to
    /// exactly the requested counties in request order.
    ///
    /// Counties absent from the upstream results are dropped silently; the
    /// caller must handle fewer-than-requested rows.
    pub async fn fetch(
        &self,
        counties: &[(String, String)],
        codes: &BTreeSet<String>,
        geo: &GeoStore,
    ) -> Result<DataFrame> {
        let groups = partition_by_table_type(codes)?;

        // Distinct states, deterministic order.
        let states: BTreeSet<&str> = counties.iter().map(|(state, _)| state.as_str()).collect();
        let mut jobs = Vec::new();
        for state in &states {
            let state_fips = geo.resolve_state_fips(state)?;
            for (table_type, codes) in &groups {
                jobs.push(QueryJob {
                    state_fips: state_fips.clone(),
                    table_type: *table_type,
                    codes: codes.clone(),
                });
            }
        }
        if jobs.is_empty() {
            debug!("No query jobs to run");
            return Ok(DataFrame::new(vec![Series::new(COL::COUNTY, Vec::<String>::new())])?);
        }
        info!("Dispatching {} query jobs over {} states", jobs.len(), states.len());

        let mut results = stream::iter(jobs)
            .map(|job| async move {
                let df = self.run_job(&job).await?;
                Ok::<(String, DataFrame), CountyViewError>((job.state_fips.clone(), df))
            })
            .buffer_unordered(self.workers);

        // Merge same-state job results as they complete. Any failed job is
        // fatal for the whole fetch; there are no partial results.
        let mut per_state: BTreeMap<String, DataFrame> = BTreeMap::new();
        while let Some(result) = results.next().await {
            let (state_fips, df) = result?;
            let merged = match per_state.remove(&state_fips) {
                Some(existing) => merge_state_tables(existing, df)?,
                None => df,
            };
            per_state.insert(state_fips, merged);
        }

        // Jobs complete in arbitrary order, so each state's merged table can
        // end up with its own column order. Normalise before the vertical
        // concat, which needs identical schemas.
        let ordered: Vec<&str> = std::iter::once(COL::COUNTY)
            .chain(codes.iter().map(String::as_str))
            .collect();
        let mut frames: Vec<LazyFrame> = Vec::with_capacity(per_state.len());
        for df in per_state.into_values() {
            frames.push(df.select(ordered.clone())?.lazy());
        }
        let all_states = concat(frames, UnionArgs::default())?.collect()?;

        let keys = counties
            .iter()
            .map(|(state, county)| county_label(county, state))
            .collect_vec();
        let filtered = filter_to_counties(all_states, &keys)?;
        debug!("Raw county table shape: {:?}", filtered.shape());
        Ok(filtered)
    }

    async fn run_job(&self, job: &QueryJob) -> Result<DataFrame> {
        let url = self.table_url(job.table_type);
        let params = vec![
            ("get", format!("NAME,{}", job.codes.join(","))),
            ("for", "county:*".to_string()),
            ("in", format!("state:{}", job.state_fips)),
        ];
        // One retry per job; a retried failure is surfaced identically.
        let rows = match self.request(&url, params.clone()).await {
            Ok(rows) => rows,
            Err(first) => {
                warn!(
                    "Query for state {} ({:?}) failed, retrying once: {first}",
                    job.state_fips, job.table_type
                );
                self.request(&url, params).await?
            }
        };
        rows_to_dataframe(rows, &job.codes)
    }

    fn table_url(&self, table_type: TableType) -> String {
        format!(
            "{}/{}/acs/{}{}",
            self.base_url,
            self.year,
            self.survey,
            table_type.route_suffix()
        )
    }

    async fn request(&self, url: &str, mut params: Vec<(&str, String)>) -> Result<Vec<Vec<Value>>> {
        if let Some(key) = &self.api_key {
            params.push(("key", key.clone()));
        }
        let response = self
            .http
            .get(url)
            .query(&params)
            .send()
            .await
            .map_err(|e| CountyViewError::UpstreamQuery(e.to_string()))?;
        if !response.status().is_success() {
            return Err(CountyViewError::UpstreamQuery(format!(
                "{url} returned {}",
                response.status()
            )));
        }
        response
            .json()
            .await
            .map_err(|e| CountyViewError::UpstreamQuery(format!("{url}: {e}")))
    }

    /// States listing for the offline cache builder: (name, fips) pairs.
    pub async fn list_states(&self) -> Result<Vec<(String, String)>> {
        let url = self.table_url(TableType::Detail);
        let rows = self
            .request(&url, vec![("get", "NAME".to_string()), ("for", "state:*".to_string())])
            .await?;
        parse_geography_rows(&rows, "state")
    }

    /// Counties of one state for the offline cache builder: (name, fips)
    /// pairs, with the ", State" tail of the display name stripped.
    pub async fn list_counties(&self, state_fips: &str) -> Result<Vec<(String, String)>> {
        let url = self.table_url(TableType::Detail);
        let rows = self
            .request(
                &url,
                vec![
                    ("get", "NAME".to_string()),
                    ("for", "county:*".to_string()),
                    ("in", format!("state:{state_fips}")),
                ],
            )
            .await?;
        Ok(parse_geography_rows(&rows, "county")?
            .into_iter()
            .map(|(name, fips)| match name.split_once(',') {
                Some((county, _)) => (county.to_string(), fips),
                None => (name, fips),
            })
            .collect())
    }
}

/// Group variable codes by table type; the map is ordered so job dispatch is
/// deterministic.
fn partition_by_table_type(codes: &BTreeSet<String>) -> Result<BTreeMap<TableType, Vec<String>>> {
    let mut groups: BTreeMap<TableType, Vec<String>> = BTreeMap::new();
    for code in codes {
        let table_type = TableType::from_code(code).ok_or_else(|| {
            CountyViewError::UpstreamQuery(format!(
                "variable '{code}' does not map to a known table type"
            ))
        })?;
        groups.entry(table_type).or_default().push(code.clone());
    }
    Ok(groups)
}

/// Horizontal merge of two same-state job results: full outer join on the
/// county key. Commutative, so job completion order cannot change the row
/// set.
fn merge_state_tables(left: DataFrame, right: DataFrame) -> Result<DataFrame> {
    Ok(left.join(
        &right,
        vec![COL::COUNTY],
        vec![COL::COUNTY],
        JoinArgs::new(JoinType::Full).with_coalesce(JoinCoalesce::CoalesceColumns),
    )?)
}

/// Filter rows down to the requested county keys, reordered to request
/// order. Keys missing upstream are dropped silently.
fn filter_to_counties(df: DataFrame, keys: &[String]) -> Result<DataFrame> {
    let column = df.column(COL::COUNTY)?.str()?;
    let mut positions: HashMap<&str, u32> = HashMap::with_capacity(column.len());
    for (idx, value) in column.into_iter().enumerate() {
        if let Some(value) = value {
            positions.entry(value).or_insert(idx as u32);
        }
    }
    let mut indices = Vec::with_capacity(keys.len());
    let mut dropped = Vec::new();
    for key in keys {
        match positions.get(key.as_str()) {
            Some(idx) => indices.push(*idx),
            None => dropped.push(key.as_str()),
        }
    }
    if !dropped.is_empty() {
        warn!("Counties missing from upstream results: {dropped:?}");
    }
    Ok(df.take(&IdxCa::from_vec("idx", indices))?)
}

fn header_position(header: &[String], column: &str) -> Result<usize> {
    header.iter().position(|h| h == column).ok_or_else(|| {
        CountyViewError::UpstreamQuery(format!("response has no '{column}' column"))
    })
}

fn split_header(rows: &[Vec<Value>]) -> Result<(Vec<String>, &[Vec<Value>])> {
    let (header, data) = rows
        .split_first()
        .ok_or_else(|| CountyViewError::UpstreamQuery("empty response body".to_string()))?;
    let header = header
        .iter()
        .map(|value| value.as_str().unwrap_or_default().to_string())
        .collect_vec();
    Ok((header, data))
}

/// Convert an upstream array-of-arrays payload (header row first) into a
/// DataFrame keyed by the county display name, one f64 column per requested
/// code. Cells that are null or fail to parse become nulls; the geography
/// columns the API appends are dropped.
fn rows_to_dataframe(rows: Vec<Vec<Value>>, codes: &[String]) -> Result<DataFrame> {
    let (header, data) = split_header(&rows)?;
    let name_idx = header_position(&header, "NAME")?;

    let counties = data
        .iter()
        .map(|row| row.get(name_idx).and_then(Value::as_str).unwrap_or_default().to_string())
        .collect_vec();

    let mut columns = vec![Series::new(COL::COUNTY, counties)];
    for code in codes {
        let idx = header_position(&header, code).map_err(|_| {
            CountyViewError::UpstreamQuery(format!(
                "response is missing requested variable '{code}'"
            ))
        })?;
        let values: Vec<Option<f64>> = data.iter().map(|row| cell_to_f64(row.get(idx))).collect();
        columns.push(Series::new(code, values));
    }
    Ok(DataFrame::new(columns)?)
}

fn cell_to_f64(value: Option<&Value>) -> Option<f64> {
    match value? {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.parse().ok(),
        _ => None,
    }
}

/// Parse a states/counties geography listing into (name, fips) pairs.
fn parse_geography_rows(rows: &[Vec<Value>], fips_column: &str) -> Result<Vec<(String, String)>> {
    let (header, data) = split_header(rows)?;
    let name_idx = header_position(&header, "NAME")?;
    let fips_idx = header_position(&header, fips_column)?;
    Ok(data
        .iter()
        .map(|row| {
            (
                row.get(name_idx).and_then(Value::as_str).unwrap_or_default().to_string(),
                row.get(fips_idx).and_then(Value::as_str).unwrap_or_default().to_string(),
            )
        })
        .collect())
}
