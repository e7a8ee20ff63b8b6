//! `fedbus check`: validate a descriptor and print what it declares.

use std::path::Path;

use anyhow::{Context, Result};
use comfy_table::{Cell, Color, ContentArrangement, Table, presets};
use console::style;

use fedbus_infra::loader::{FederationReport, check_federation};

pub async fn check(config: &Path, json: bool) -> Result<()> {
    let report = check_federation(config)
        .await
        .with_context(|| format!("{} is not a valid federation", config.display()))?;

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    println!(
        "{} {} ({} bus(es))",
        style("✓").green().bold(),
        report.descriptor.display(),
        report.buses.len()
    );
    println!("{}", render_table(&report));
    Ok(())
}

fn render_table(report: &FederationReport) -> Table {
    let mut table = Table::new();
    table.load_preset(presets::UTF8_FULL_CONDENSED);
    table.set_content_arrangement(ContentArrangement::Dynamic);
    table.set_header(vec![
        Cell::new("Bus").fg(Color::White),
        Cell::new("Routing").fg(Color::White),
        Cell::new("Workers").fg(Color::White),
        Cell::new("Translators").fg(Color::White),
        Cell::new("Rules").fg(Color::White),
    ]);

    for bus in &report.buses {
        let translators = bus
            .translators
            .iter()
            .map(|t| format!("{} ({})", t.name, t.kind))
            .collect::<Vec<_>>()
            .join("\n");
        let rules = bus
            .rules
            .as_ref()
            .map(|r| r.join("\n"))
            .unwrap_or_else(|| "-".to_string());
        let routing = match bus.routing {
            "rules" => Cell::new("rules").fg(Color::Cyan),
            other => Cell::new(other).fg(Color::Green),
        };
        table.add_row(vec![
            Cell::new(&bus.name),
            routing,
            Cell::new(bus.workers),
            Cell::new(translators),
            Cell::new(rules),
        ]);
    }
    table
}
