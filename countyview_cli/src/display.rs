use std::collections::BTreeMap;

use comfy_table::{presets::NOTHING, *};
use serde_json::Value;

use countyview::catalog::VariableOption;
use countyview::DictView;

fn base_table() -> Table {
    let mut table = Table::new();
    table
        .load_preset(NOTHING)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_style(comfy_table::TableComponent::BottomBorder, '─')
        .set_style(comfy_table::TableComponent::MiddleHeaderIntersections, '─')
        .set_style(comfy_table::TableComponent::HeaderLines, '─')
        .set_style(comfy_table::TableComponent::BottomBorderIntersections, '─')
        .set_style(comfy_table::TableComponent::TopBorder, '─')
        .set_style(comfy_table::TableComponent::TopBorderIntersections, '─');
    table
}

fn value_to_cell(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Number(n) => n.to_string(),
        Value::Null => "-".to_string(),
        other => other.to_string(),
    }
}

/// Render the category-grouped view, one table per category, headed by the
/// display column names.
pub fn display_dict_view(dict: &DictView, colnames: &[String]) {
    for (category, rows) in dict {
        let mut table = base_table();
        table.set_header(
            colnames
                .iter()
                .map(|name| Cell::new(name).add_attribute(Attribute::Bold))
                .collect::<Vec<_>>(),
        );
        for row in rows {
            table.add_row(row.iter().map(value_to_cell).collect::<Vec<_>>());
        }
        if !category.is_empty() {
            println!("\n{category}");
        }
        println!("{table}");
    }
}

/// Render the availability listing, one table per category, for picking
/// variable ids to pass to the `data` command.
pub fn display_variables(grouped: &BTreeMap<String, Vec<VariableOption>>) {
    for (category, options) in grouped {
        let mut table = base_table();
        table.set_header(vec![
            Cell::new("Id").add_attribute(Attribute::Bold),
            Cell::new("Name").add_attribute(Attribute::Bold),
            Cell::new("Description").add_attribute(Attribute::Bold),
        ]);
        for option in options {
            table.add_row(vec![
                option.id.to_string(),
                option.name.clone(),
                option.description.clone(),
            ]);
        }
        println!("\n{category}");
        println!("{table}");
    }
}
