use std::collections::HashSet;
use std::fs::File;
use std::path::Path;

use clap::{command, Args, Parser, Subcommand};
use enum_dispatch::enum_dispatch;
use log::info;
use polars::frame::DataFrame;
use serde::{Deserialize, Serialize};
use strum_macros::EnumString;

use countyview::catalog::VariableCatalog;
use countyview::census::CensusClient;
use countyview::config::Config;
use countyview::geo::{self, GeoStore};
use countyview::view;
use countyview::CountyView;

use crate::display::{display_dict_view, display_variables};
use crate::error::{CountyViewCliError, CountyViewCliResult};

/// Defines the output formats the `data` command can produce.
#[derive(Clone, Debug, Deserialize, Serialize, EnumString, PartialEq, Eq)]
#[strum(ascii_case_insensitive)]
pub enum OutputFormat {
    Stdout,
    Csv,
}

/// Trait that defines what to run when a given subcommand is invoked.
#[enum_dispatch]
pub trait RunCommand {
    async fn run(&self, config: Config) -> CountyViewCliResult<()>;
}

#[derive(Parser, Debug)]
#[command(
    version,
    about = "countyview: county-level ACS statistics from the terminal",
    long_about = None,
    name = "countyview"
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[enum_dispatch(RunCommand)]
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// List the states in the geography snapshot
    States(StatesCommand),
    /// List the counties of one state
    Counties(CountiesCommand),
    /// List the variables available for selection, grouped by category
    Variables(VariablesCommand),
    /// Fetch and tabulate data for selected counties and variables
    Data(DataCommand),
    /// Build the geography snapshot from the Census API
    Cache(CacheCommand),
}

#[derive(Args, Debug)]
pub struct StatesCommand {}

impl RunCommand for StatesCommand {
    async fn run(&self, config: Config) -> CountyViewCliResult<()> {
        let store = GeoStore::open(&config.db_path)?;
        for state in store.list_states()? {
            println!("{state}");
        }
        Ok(())
    }
}

#[derive(Args, Debug)]
pub struct CountiesCommand {
    #[arg(short, long, help = "State to list the counties of")]
    state: String,
}

impl RunCommand for CountiesCommand {
    async fn run(&self, config: Config) -> CountyViewCliResult<()> {
        let store = GeoStore::open(&config.db_path)?;
        for county in store.list_counties(&self.state)? {
            println!("{county}");
        }
        Ok(())
    }
}

#[derive(Args, Debug)]
pub struct VariablesCommand {}

impl RunCommand for VariablesCommand {
    async fn run(&self, config: Config) -> CountyViewCliResult<()> {
        let catalog = VariableCatalog::load(&config.vars_path)?;
        display_variables(&catalog.available_variables());
        Ok(())
    }
}

/// The `data` command runs the full pipeline: resolve geographies and
/// variables, fetch from the Census API, transform and tabulate.
#[derive(Args, Debug)]
pub struct DataCommand {
    #[arg(
        short = 'c',
        long = "county",
        value_name = "COUNTY, STATE",
        help = "County to fetch, as its \"County Name, State Name\" label (repeatable)"
    )]
    counties: Vec<String>,
    #[arg(
        short = 'v',
        long = "var",
        value_name = "ID",
        help = "Catalog id of a variable to include (repeatable); defaults to all"
    )]
    vars: Vec<String>,
    #[arg(
        short = 'f',
        long,
        default_value = "stdout",
        value_name = "stdout|csv",
        help = "Output format for the results"
    )]
    output_format: OutputFormat,
    #[arg(short = 'o', long, help = "Output file to place the results")]
    output_file: Option<String>,
}

impl RunCommand for DataCommand {
    async fn run(&self, config: Config) -> CountyViewCliResult<()> {
        let viewer = CountyView::new_with_config(config)?;
        let counties = parse_county_labels(&self.counties)?;
        let ids: HashSet<String> = if self.vars.is_empty() {
            viewer
                .catalog
                .definitions()
                .iter()
                .map(|def| def.id.to_string())
                .collect()
        } else {
            self.vars.iter().cloned().collect()
        };

        match self.output_format {
            OutputFormat::Csv => {
                let flat = viewer.view_table(&counties, &ids).await?;
                write_output(flat, self.output_file.as_ref())?;
            }
            OutputFormat::Stdout => {
                let (dict, colnames) = viewer.view_dict(&counties, &ids).await?;
                display_dict_view(&dict, &colnames);
            }
        }
        Ok(())
    }
}

/// Split "County Name, State Name" labels into (state, county) pairs.
fn parse_county_labels(labels: &[String]) -> CountyViewCliResult<Vec<(String, String)>> {
    labels
        .iter()
        .map(|label| {
            label
                .split_once(',')
                .map(|(county, state)| (state.trim().to_string(), county.trim().to_string()))
                .ok_or_else(|| CountyViewCliError::InvalidCountyLabel(label.clone()))
        })
        .collect()
}

fn write_output<P: AsRef<Path>>(flat: DataFrame, output_file: Option<P>) -> CountyViewCliResult<()> {
    if let Some(output_file) = output_file {
        let mut f = File::create(output_file)?;
        view::write_csv(&flat, &mut f)?;
    } else {
        let mut stdout_lock = std::io::stdout().lock();
        view::write_csv(&flat, &mut stdout_lock)?;
    }
    Ok(())
}

/// The `cache` command is the offline ETL that builds the geography
/// snapshot: every state and county name with its FIPS code, written to the
/// SQLite file the serving path later opens read-only.
#[derive(Args, Debug)]
pub struct CacheCommand {
    #[arg(short, long, help = "Where to write the snapshot; defaults to the configured db path")]
    output: Option<String>,
}

impl RunCommand for CacheCommand {
    async fn run(&self, config: Config) -> CountyViewCliResult<()> {
        let path = self.output.clone().unwrap_or_else(|| config.db_path.clone());
        let client = CensusClient::new(&config)?;

        info!("Building states cache");
        let states = client.list_states().await?;

        let mut counties = Vec::new();
        for (state, state_fips) in &states {
            info!("Fetching counties for {state}");
            for (county, county_fips) in client.list_counties(state_fips).await? {
                counties.push((state.clone(), county, county_fips));
            }
        }

        geo::write_snapshot(&path, &states, &counties)?;
        println!(
            "Wrote {} states and {} counties to {path}",
            states.len(),
            counties.len()
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_county_labels() {
        let labels = vec!["Allegheny County, Pennsylvania".to_string()];
        let parsed = parse_county_labels(&labels).unwrap();
        assert_eq!(
            parsed,
            vec![("Pennsylvania".to_string(), "Allegheny County".to_string())]
        );
    }

    #[test]
    fn test_parse_county_labels_rejects_missing_state() {
        let labels = vec!["Allegheny County".to_string()];
        assert!(matches!(
            parse_county_labels(&labels),
            Err(CountyViewCliError::InvalidCountyLabel(_))
        ));
    }

    #[test]
    fn test_output_format_parses_case_insensitively() {
        use std::str::FromStr;
        assert_eq!(OutputFormat::from_str("CSV").unwrap(), OutputFormat::Csv);
        assert_eq!(OutputFormat::from_str("stdout").unwrap(), OutputFormat::Stdout);
    }
}
