//! Categories command implementation

use super::{Cli, CliError, OutputFormat};
use crate::config::CategoryTable;
use crate::FacilityCategory;
use clap::Args;
use serde::Serialize;

/// Show the configured facility categories
#[derive(Args, Debug, Clone)]
pub struct CategoriesCommand {
    /// Include the Overpass QL templates
    #[arg(long)]
    pub show_predicates: bool,
}

/// One category row
#[derive(Debug, Serialize)]
pub struct CategoryRow {
    /// Category tag
    pub category: FacilityCategory,
    /// Label used in reports
    pub display_name: &'static str,
    /// Base search radius in meters
    pub radius_m: u32,
    /// Escalated search radius in meters
    pub escalated_radius_m: u32,
    /// Predicate version used in cache keys
    pub predicate_version: String,
    /// Overpass QL template
    #[serde(skip_serializing_if = "Option::is_none")]
    pub predicate: Option<String>,
}

/// Build rows from a category table
pub fn category_rows(table: &CategoryTable, with_predicates: bool) -> Vec<CategoryRow> {
    table
        .iter()
        .map(|entry| CategoryRow {
            category: entry.category(),
            display_name: entry.category().display_name(),
            radius_m: entry.radius_m(),
            escalated_radius_m: entry.escalated_radius_m(),
            predicate_version: entry.predicate_version().to_string(),
            predicate: with_predicates.then(|| entry.predicate().to_string()),
        })
        .collect()
}

impl CategoriesCommand {
    /// Execute the categories command
    pub fn execute(&self, cli: &Cli) -> Result<(), CliError> {
        let config = cli.load_config()?;
        let table = config.category_table()?;
        let rows = category_rows(&table, self.show_predicates);

        match cli.output_format {
            OutputFormat::Json => {
                let json = serde_json::to_string_pretty(&rows)
                    .map_err(|e| CliError::InvalidArgument(format!("JSON serialization failed: {e}")))?;
                println!("{json}");
            }
            OutputFormat::Human => {
                println!(
                    "{:<14} {:<24} {:>8} {:>10}  {}",
                    "CATEGORY", "NAME", "RADIUS", "ESCALATED", "VERSION"
                );
                for row in &rows {
                    println!(
                        "{:<14} {:<24} {:>7}m {:>9}m  {}",
                        row.category.as_str(),
                        row.display_name,
                        row.radius_m,
                        row.escalated_radius_m,
                        row.predicate_version
                    );
                    if let Some(predicate) = &row.predicate {
                        println!("    {predicate}");
                    }
                }
                println!();
                println!("Escalation: {}", config.escalation.as_str());
            }
        }
        Ok(())
    }
}
