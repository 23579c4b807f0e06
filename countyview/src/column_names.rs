//! This module stores the column names shared between the raw, formatted and
//! flat tables. The flat-table names are also the headers of the CSV export,
//! so renaming them is a breaking change for downstream consumers.

/// Row key of the raw table ("County Name, State Name") and first column of
/// the flat export table.
pub const COUNTY: &str = "county";

/// Output variable name column of the formatted table.
pub const NAME: &str = "name";

/// Display grouping label attached to each formatted row, stripped before
/// the final grouping.
pub const CATEGORY: &str = "category";

/// Header of the first display column.
pub const COLUMN_NAME_HEADER: &str = "Column Name";
