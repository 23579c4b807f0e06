//! The variable catalog: definitions of the derived output variables, loaded
//! once at process start from a JSON config document and immutable after.

use std::collections::{BTreeMap, HashSet};
use std::path::Path;

use log::debug;
use nonempty::NonEmpty;
use serde::{Deserialize, Serialize};

use crate::census::TableType;
use crate::error::{CountyViewError, Result};
use crate::expr;

const MIN_DEFINITION_LEN: usize = 3;

/// One derived output variable: the raw variable codes it needs from the
/// API, the arithmetic expression that combines them and the category it is
/// displayed under.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VariableDefinition {
    /// Zero-based position in load order. Recomputed every load, so ids must
    /// not be persisted across restarts with a changed config file.
    #[serde(skip)]
    pub id: usize,
    pub name: String,
    pub vars: NonEmpty<String>,
    pub definition: String,
    pub category: String,
    #[serde(default)]
    pub description: Option<String>,
}

/// An entry of the category-grouped availability listing that feeds the
/// variable-selection form.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VariableOption {
    pub id: usize,
    pub name: String,
    pub description: String,
}

#[derive(Debug)]
pub struct VariableCatalog {
    defs: Vec<VariableDefinition>,
}

impl VariableCatalog {
    /// Load and validate the config document at `path`. Any violation is a
    /// fatal `Config` error; the process should not start without a valid
    /// catalog.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|e| {
            CountyViewError::Config(format!("config file '{}' unreadable: {e}", path.display()))
        })?;
        Self::from_json(&contents)
    }

    /// Parse and validate a config document held in a JSON string.
    pub fn from_json(contents: &str) -> Result<Self> {
        let mut defs: Vec<VariableDefinition> = serde_json::from_str(contents)
            .map_err(|e| CountyViewError::Config(format!("not a valid config: {e}")))?;
        let mut seen_names = HashSet::new();
        for (id, def) in defs.iter_mut().enumerate() {
            def.id = id;
            validate(def)?;
            if !seen_names.insert(def.name.clone()) {
                return Err(config_error(def, "duplicate variable name"));
            }
        }
        debug!("Loaded {} variable definitions", defs.len());
        Ok(Self { defs })
    }

    pub fn definitions(&self) -> &[VariableDefinition] {
        &self.defs
    }

    /// Variables grouped by category for the selection form. Categories are
    /// sorted; entries keep load order within each category.
    pub fn available_variables(&self) -> BTreeMap<String, Vec<VariableOption>> {
        let mut grouped: BTreeMap<String, Vec<VariableOption>> = BTreeMap::new();
        for def in &self.defs {
            grouped.entry(def.category.clone()).or_default().push(VariableOption {
                id: def.id,
                name: def.name.clone(),
                description: def.description.clone().unwrap_or_default(),
            });
        }
        grouped
    }

    /// Resolve form-encoded id strings to definitions, in catalog order. Ids
    /// that match nothing are skipped without error so that stale
    /// client-side form state cannot fail a request.
    pub fn resolve_by_ids(&self, ids: &HashSet<String>) -> Vec<&VariableDefinition> {
        self.defs
            .iter()
            .filter(|def| ids.contains(&def.id.to_string()))
            .collect()
    }
}

fn config_error(def: &VariableDefinition, message: impl std::fmt::Display) -> CountyViewError {
    CountyViewError::Config(format!("definition '{}': {message}", def.name))
}

fn validate(def: &VariableDefinition) -> Result<()> {
    if def.definition.len() < MIN_DEFINITION_LEN {
        return Err(config_error(
            def,
            format!("definition must be at least {MIN_DEFINITION_LEN} characters"),
        ));
    }
    for code in def.vars.iter() {
        if TableType::from_code(code).is_none() {
            return Err(config_error(
                def,
                format!("variable '{code}' does not map to a known table type"),
            ));
        }
    }
    // The expression may only reference codes listed in its own `vars`.
    let parsed = expr::parse(&def.definition)
        .map_err(|e| config_error(def, format!("definition does not parse: {e}")))?;
    let allowed: HashSet<&str> = def.vars.iter().map(String::as_str).collect();
    for ident in parsed.identifiers() {
        if !allowed.contains(ident) {
            return Err(config_error(
                def,
                format!("definition references '{ident}' which is not listed in vars"),
            ));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    const VALID_CONFIG: &str = r#"[
        {
            "name": "Total Population",
            "vars": ["B01003_001E"],
            "definition": "B01003_001E",
            "category": "Population",
            "description": "ACS total population estimate"
        },
        {
            "name": "Pct Non-White",
            "vars": ["B02001_001E", "B02001_002E"],
            "definition": "(B02001_001E - B02001_002E) / B02001_001E",
            "category": "Race"
        },
        {
            "name": "Pct White",
            "vars": ["B02001_001E", "B02001_002E"],
            "definition": "B02001_002E / B02001_001E",
            "category": "Race"
        }
    ]"#;

    #[test]
    fn test_load_assigns_positional_ids() {
        let catalog = VariableCatalog::from_json(VALID_CONFIG).unwrap();
        let ids: Vec<usize> = catalog.definitions().iter().map(|def| def.id).collect();
        assert_eq!(ids, vec![0, 1, 2]);
        assert_eq!(catalog.definitions()[1].name, "Pct Non-White");
    }

    #[test]
    fn test_missing_required_field() {
        let config = r#"[{"name": "X", "vars": ["B01_1E"], "definition": "B01_1E"}]"#;
        let err = VariableCatalog::from_json(config).unwrap_err();
        assert!(
            matches!(err, CountyViewError::Config(_)),
            "A definition without a category should not load"
        );
    }

    #[test]
    fn test_empty_vars() {
        let config = r#"[{"name": "X", "vars": [], "definition": "1 + 1", "category": "C"}]"#;
        assert!(matches!(
            VariableCatalog::from_json(config),
            Err(CountyViewError::Config(_))
        ));
    }

    #[test]
    fn test_short_definition() {
        let config = r#"[{"name": "X", "vars": ["B01_1E"], "definition": "1", "category": "C"}]"#;
        assert!(matches!(
            VariableCatalog::from_json(config),
            Err(CountyViewError::Config(_))
        ));
    }

    #[test]
    fn test_definition_must_only_reference_own_vars() {
        let config = r#"[{
            "name": "X",
            "vars": ["B01_1E"],
            "definition": "B01_1E + B99_9E",
            "category": "C"
        }]"#;
        let err = VariableCatalog::from_json(config).unwrap_err();
        assert!(err.to_string().contains("B99_9E"));
    }

    #[test]
    fn test_unknown_table_type_rejected_at_load() {
        let config = r#"[{"name": "X", "vars": ["Z9999"], "definition": "Z9999", "category": "C"}]"#;
        assert!(matches!(
            VariableCatalog::from_json(config),
            Err(CountyViewError::Config(_))
        ));
    }

    #[test]
    fn test_duplicate_names_rejected() {
        let config = r#"[
            {"name": "X", "vars": ["B01_1E"], "definition": "B01_1E", "category": "C"},
            {"name": "X", "vars": ["B01_2E"], "definition": "B01_2E", "category": "C"}
        ]"#;
        assert!(matches!(
            VariableCatalog::from_json(config),
            Err(CountyViewError::Config(_))
        ));
    }

    #[test]
    fn test_available_variables_grouped_and_sorted() {
        let catalog = VariableCatalog::from_json(VALID_CONFIG).unwrap();
        let grouped = catalog.available_variables();
        let categories: Vec<&str> = grouped.keys().map(String::as_str).collect();
        assert_eq!(categories, vec!["Population", "Race"]);
        assert_eq!(grouped["Race"].len(), 2);
        assert_eq!(grouped["Population"][0].description, "ACS total population estimate");
        assert_eq!(
            grouped["Race"][0].description, "",
            "A missing description should come through empty"
        );
    }

    #[test]
    fn test_resolve_by_ids_skips_unmatched() {
        let catalog = VariableCatalog::from_json(VALID_CONFIG).unwrap();
        let ids: HashSet<String> = ["1".to_string(), "999".to_string()].into_iter().collect();
        let defs = catalog.resolve_by_ids(&ids);
        assert_eq!(defs.len(), 1, "Unmatched ids should be skipped, not an error");
        assert_eq!(defs[0].name, "Pct Non-White");
    }
}
