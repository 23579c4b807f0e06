//! Reshapes the formatted table into the two shapes the serving layer
//! consumes: a category-grouped dict view for table rendering and a flat
//! table for CSV export.

use std::collections::BTreeMap;

use itertools::Itertools;
use polars::frame::DataFrame;
use polars::prelude::{CsvWriter, NamedFrom, SerWriter};
use polars::series::Series;
use serde_json::{json, Value};

use crate::error::Result;
use crate::geo::county_label;
use crate::COL;

/// Category name mapped to its display rows, each row being
/// `[variable name, value for county 1, value for county 2, ...]`.
pub type DictView = BTreeMap<String, Vec<Vec<Value>>>;

fn county_columns(formatted: &DataFrame) -> Vec<String> {
    formatted
        .get_column_names()
        .into_iter()
        .filter(|name| *name != COL::NAME && *name != COL::CATEGORY)
        .map(str::to_string)
        .collect_vec()
}

/// Group the formatted table's rows by category, dropping the category
/// column. Categories are iterated in sorted order so the output is
/// deterministic, and every category yields a sequence of rows even when it
/// holds exactly one. Non-finite values (e.g. a division by zero) come
/// through as JSON nulls.
pub fn to_dict(formatted: &DataFrame, categories: &[String]) -> Result<DictView> {
    let mut sorted = categories.to_vec();
    sorted.sort();
    sorted.dedup();

    let counties = county_columns(formatted);
    let names = formatted.column(COL::NAME)?.str()?;
    let row_categories = formatted.column(COL::CATEGORY)?.str()?;

    let mut dict = DictView::new();
    for category in sorted {
        let mut rows: Vec<Vec<Value>> = Vec::new();
        for idx in 0..formatted.height() {
            if row_categories.get(idx) != Some(category.as_str()) {
                continue;
            }
            let mut row = vec![Value::from(names.get(idx).unwrap_or_default())];
            for county in &counties {
                row.push(json!(formatted.column(county)?.f64()?.get(idx)));
            }
            rows.push(row);
        }
        dict.insert(category, rows);
    }
    Ok(dict)
}

/// The transpose of the formatted table: one row per county, one column per
/// output variable, headed by the county key. This is the CSV export shape.
pub fn to_flat_table(formatted: &DataFrame) -> Result<DataFrame> {
    let counties = county_columns(formatted);
    let names = formatted
        .column(COL::NAME)?
        .str()?
        .into_no_null_iter()
        .collect_vec();

    let mut columns = Vec::with_capacity(names.len() + 1);
    columns.push(Series::new(COL::COUNTY, counties.clone()));
    for (idx, name) in names.iter().enumerate() {
        let mut values = Vec::with_capacity(counties.len());
        for county in &counties {
            values.push(formatted.column(county)?.f64()?.get(idx));
        }
        columns.push(Series::new(name, values));
    }
    Ok(DataFrame::new(columns)?)
}

/// Serialize a flat table as CSV, header row `county,<output variable
/// names...>`.
pub fn write_csv<W: std::io::Write>(flat: &DataFrame, writer: &mut W) -> Result<()> {
    CsvWriter::new(writer).finish(&mut flat.clone())?;
    Ok(())
}

/// Display column names for the dict view, in the same order as the input
/// county list (not re-sorted).
pub fn display_column_names(counties: &[(String, String)]) -> Vec<String> {
    let mut colnames = vec![COL::COLUMN_NAME_HEADER.to_string()];
    colnames.extend(
        counties
            .iter()
            .map(|(state, county)| county_label(county, state)),
    );
    colnames
}

/// The view rendered when no counties are selected: a single-cell
/// placeholder table rather than an empty one, so the dashboard always has
/// something to show. This is a documented default view state, not an error.
pub fn placeholder_view() -> (DictView, Vec<String>) {
    let mut dict = DictView::new();
    dict.insert(
        String::new(),
        vec![vec![Value::from("No row data!")]],
    );
    (dict, vec!["No column data!".to_string()])
}
