use clap::Parser;
use std::process::ExitCode;
use tracing::debug;
use tracing_subscriber::EnvFilter;

use vgrid::{
    Direction, FileSource, FilterOp, FilterSpec, GridConfig, GridError, JsonFileStore,
    TableEngine, UserContext,
};

const MAX_COLUMN_WIDTH: usize = 32;

/// Run one entity grid from the command line: load records through the
/// data-source trait, drive the engine the way a portal page would, print
/// the windowed snapshot (or the full export sequence as CSV).
#[derive(Debug, Parser)]
#[command(
    name = "vgrid",
    version,
    after_help = "Example:\n  vgrid demos/job_postings.json --schema demos/job_schema.json \\\n      --sort \"Posting Date:desc\" --query developer"
)]
struct Cli {
    /// JSON record file (bare array or {success, data} envelope).
    records: String,

    /// Entity schema JSON file.
    #[arg(long)]
    schema: String,

    /// Sort key, e.g. "Posting Date" or "Rate:desc".
    #[arg(long)]
    sort: Option<String>,

    /// Column filter "COL:OP:VALUE[:VALUE2]" with OP one of contains,
    /// not_contains, equals, above, below, between. Repeatable.
    #[arg(long)]
    filter: Vec<String>,

    /// Global free-text query over the schema's searchable columns.
    #[arg(long)]
    query: Option<String>,

    /// Hide a column. Repeatable.
    #[arg(long)]
    hide: Vec<String>,

    /// Comma separated column order override.
    #[arg(long)]
    order: Option<String>,

    /// Rows to expose (defaults to the engine's window size).
    #[arg(long)]
    window: Option<usize>,

    /// Emit the full filtered+sorted sequence as CSV instead of a table.
    #[arg(long)]
    csv: bool,

    /// Preference store file; with --user, saved preferences are restored
    /// before flags apply and written back afterwards.
    #[arg(long)]
    prefs: Option<String>,

    #[arg(long, default_value = "local")]
    user: String,
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    match run(Cli::parse()) {
        Err(e) => {
            eprintln!("Error: {e}");
            ExitCode::FAILURE
        }
        Ok(_) => ExitCode::SUCCESS,
    }
}

fn run(cli: Cli) -> Result<(), GridError> {
    let schema_path = shellexpand::full(&cli.schema)
        .map_err(|e| GridError::ValidationFailed(e.to_string()))?
        .into_owned();
    let records_path = shellexpand::full(&cli.records)
        .map_err(|e| GridError::ValidationFailed(e.to_string()))?
        .into_owned();

    let schema = serde_json::from_str(&std::fs::read_to_string(schema_path)?)?;
    let mut engine = TableEngine::new(schema, GridConfig::default());
    let ctx = UserContext::new(&cli.user, "cli");

    let mut store = cli.prefs.as_ref().map(|p| JsonFileStore::new(p.as_str()));
    if let Some(store) = &store {
        engine.restore_preference(store, &cli.user);
    }

    engine.load(&FileSource::new(records_path), &ctx)?;

    if let Some(sort) = &cli.sort {
        let (key, direction) = parse_sort(sort);
        engine.set_sort(key, direction);
    }
    for raw in &cli.filter {
        let (column, spec) = parse_filter(raw)?;
        engine.set_filter(&column, Some(spec));
    }
    if let Some(query) = &cli.query {
        engine.set_global_query(query);
    }
    if !cli.hide.is_empty() || cli.order.is_some() {
        let mut pref = engine.preference().clone();
        if let Some(order) = &cli.order {
            pref.order = order.split(',').map(|s| s.trim().to_string()).collect();
        }
        pref.hidden.extend(cli.hide.iter().cloned());
        engine.set_column_preference(pref);
        if let Some(store) = &mut store {
            engine.save_preference(store, &cli.user)?;
        }
    }
    if let Some(window) = cli.window {
        let current = engine.window();
        engine.expand_window(window.saturating_sub(current));
    }

    if cli.csv {
        print_csv(&engine);
    } else {
        print_table(&engine);
    }
    Ok(())
}

fn parse_sort(raw: &str) -> (&str, Direction) {
    match raw.rsplit_once(':') {
        Some((key, "desc")) => (key, Direction::Descending),
        Some((key, "asc")) => (key, Direction::Ascending),
        _ => (raw, Direction::Ascending),
    }
}

fn parse_filter(raw: &str) -> Result<(String, FilterSpec), GridError> {
    let parts: Vec<&str> = raw.splitn(4, ':').collect();
    if parts.len() < 3 {
        return Err(GridError::ValidationFailed(format!(
            "filter must be COL:OP:VALUE[:VALUE2], got {raw}"
        )));
    }
    let op = match parts[1] {
        "contains" => FilterOp::Contains,
        "not_contains" => FilterOp::NotContains,
        "equals" => FilterOp::Equals,
        "above" => FilterOp::Above,
        "below" => FilterOp::Below,
        "between" => FilterOp::Between,
        other => {
            return Err(GridError::ValidationFailed(format!(
                "unknown filter operator {other}"
            )));
        }
    };
    let mut spec = FilterSpec::new(op, parts[2]);
    if let Some(&high) = parts.get(3) {
        spec.value2 = Some(high.to_string());
    }
    debug!("Parsed filter on {}: {:?}", parts[0], spec);
    Ok((parts[0].to_string(), spec))
}

fn truncate(name: &str, width: usize) -> String {
    if name.len() <= width {
        return name.to_string();
    }
    if width < 3 {
        return String::new();
    }
    let mut reduced: String = name.chars().take(width - 3).collect();
    reduced.push_str("...");
    reduced
}

fn print_table(engine: &TableEngine) {
    let snap = engine.snapshot();
    if snap.columns.is_empty() {
        println!("(no columns visible)");
        return;
    }

    let mut widths: Vec<usize> = snap.columns.iter().map(|c| c.len()).collect();
    for row in &snap.rows {
        for (i, cell) in row.cells.iter().enumerate() {
            widths[i] = std::cmp::max(widths[i], cell.len());
        }
    }
    for w in widths.iter_mut() {
        *w = std::cmp::min(*w, MAX_COLUMN_WIDTH);
    }

    let header: Vec<String> = snap
        .columns
        .iter()
        .zip(&widths)
        .map(|(c, &w)| format!("{:<w$}", truncate(c, w)))
        .collect();
    println!("{}", header.join("  "));

    for row in &snap.rows {
        let line: Vec<String> = row
            .cells
            .iter()
            .zip(&widths)
            .map(|(c, &w)| format!("{:<w$}", truncate(c, w)))
            .collect();
        println!("{}", line.join("  "));
    }
    println!("({} of {} rows shown)", snap.rows.len(), snap.total);
}

// Export consumers own their serialization; CSV quoting lives here in the
// CLI, not in the engine.
fn wrap_csv_cell(c: &str) -> String {
    let needs_escaping = c.contains('"');
    let needs_wrapping = c.contains(',') || c.contains('\n') || needs_escaping;
    let mut out = c.to_string();

    if needs_escaping {
        out = out.replace('"', "\"\"");
    }
    if needs_wrapping {
        out = format!("\"{out}\"");
    }
    out
}

fn print_csv(engine: &TableEngine) {
    let (columns, rows) = engine.export_rows();
    let header: Vec<String> = columns.iter().map(|c| wrap_csv_cell(c)).collect();
    println!("{}", header.join(","));
    for row in rows {
        let line: Vec<String> = row.iter().map(|c| wrap_csv_cell(c)).collect();
        println!("{}", line.join(","));
    }
}
