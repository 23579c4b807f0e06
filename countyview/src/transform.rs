//! Applies catalog definitions to the raw county table and reshapes the
//! result for display.

use itertools::Itertools;
use log::debug;
use polars::frame::DataFrame;
use polars::prelude::NamedFrom;
use polars::series::Series;

use crate::catalog::VariableDefinition;
use crate::error::{CountyViewError, Result};
use crate::{expr, COL};

/// Evaluate every definition against the raw table and pivot the result into
/// the formatted table: one row per output variable (`name` column), one
/// column per county in raw row order, plus the `category` column. All raw
/// columns are dropped; only derived columns survive.
///
/// A definition referencing a variable code absent from `raw` (for example
/// because the upstream fetch silently dropped a geography) fails with an
/// `Expression` error naming the definition; that gap must be surfaced here,
/// not masked.
pub fn transform(raw: &DataFrame, defs: &[&VariableDefinition]) -> Result<DataFrame> {
    let counties = raw
        .column(COL::COUNTY)?
        .str()?
        .into_no_null_iter()
        .map(str::to_string)
        .collect_vec();

    // Rows of the pivoted output: values[i][j] is definition i evaluated for
    // county j.
    let mut values: Vec<Vec<f64>> = Vec::with_capacity(defs.len());
    for def in defs {
        let parsed = expr::parse(&def.definition)
            .map_err(|e| expression_error(def, e.to_string()))?;
        let mut row = Vec::with_capacity(counties.len());
        for idx in 0..raw.height() {
            let value = parsed
                .eval(&|code: &str| cell(raw, code, idx))
                .map_err(|e| match e {
                    expr::ExprError::UnknownColumn(code) => expression_error(
                        def,
                        format!("referenced variable '{code}' is missing from the fetched data"),
                    ),
                    other => expression_error(def, other.to_string()),
                })?;
            row.push(value);
        }
        values.push(row);
    }
    debug!("Transformed {} definitions over {} counties", defs.len(), counties.len());

    let mut columns = Vec::with_capacity(counties.len() + 2);
    columns.push(Series::new(
        COL::NAME,
        defs.iter().map(|def| def.name.clone()).collect_vec(),
    ));
    for (j, county) in counties.iter().enumerate() {
        let column = values.iter().map(|row| row[j]).collect_vec();
        columns.push(Series::new(county.as_str(), column));
    }
    columns.push(Series::new(
        COL::CATEGORY,
        defs.iter().map(|def| def.category.clone()).collect_vec(),
    ));
    Ok(DataFrame::new(columns)?)
}

/// A cell of the raw table. `None` means the column is absent entirely;
/// a present-but-null cell (missing upstream data) evaluates as NaN.
fn cell(raw: &DataFrame, code: &str, idx: usize) -> Option<f64> {
    let values = raw.column(code).ok()?.f64().ok()?;
    Some(values.get(idx).unwrap_or(f64::NAN))
}

fn expression_error(def: &VariableDefinition, reason: String) -> CountyViewError {
    CountyViewError::Expression {
        name: def.name.clone(),
        reason,
    }
}
