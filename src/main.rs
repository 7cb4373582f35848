use std::path::PathBuf;

use anyhow::{Context, anyhow};
use clap::{Parser, Subcommand};
use serde::Serialize;
use tool_data_tables::{ReloadSelector, config::Settings};
use tracing::error;

#[derive(Parser)]
#[command(name = "tool-data-tables", version)]
struct Opts {
    #[clap(short, long, env = "TOOL_DATA_CONFIG")]
    config: PathBuf,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// List loaded tables with their content version
    List,
    /// Print a table, or a single field with its files when `--field` is given
    Show {
        table: String,
        #[arg(long)]
        field: Option<String>,
    },
    /// Look up values of one column by another
    Query {
        table: String,
        column: String,
        value: String,
        #[arg(short, long = "return", default_value = "path")]
        return_column: String,
    },
    /// Add a row
    Add {
        table: String,
        fields: Vec<String>,
        #[arg(long)]
        persist: bool,
        #[arg(long)]
        allow_duplicates: bool,
    },
    /// Remove a row from every location file of a table
    Remove { table: String, fields: Vec<String> },
    /// Reload tables from their files
    Reload {
        names: Vec<String>,
        #[arg(long, conflicts_with = "names")]
        path: Option<String>,
    },
    /// Import the table definitions shipped with an installed repository
    Install {
        path: PathBuf,
        #[arg(long)]
        persist: bool,
    },
    /// Write the registry state as JSON
    Snapshot { output: PathBuf },
}

fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn run(opts: Opts) -> anyhow::Result<()> {
    let settings = std::fs::read_to_string(&opts.config).with_context(|| "read config")?;
    let settings = Settings::from_yaml(&settings)
        .with_context(|| format!("parse config from {}", opts.config.display()))?;
    let mut registry = settings
        .open_registry()
        .with_context(|| "load tool data tables")?;
    let missing = |name: &str| anyhow!("no such data table: {name}");

    match opts.command {
        Command::List => {
            #[derive(Serialize)]
            struct Listed<'a> {
                name: &'a str,
                version: u64,
                rows: usize,
                missing_index_file: Option<&'a str>,
            }
            let listed: Vec<_> = registry
                .tables()
                .map(|table| Listed {
                    name: table.name(),
                    version: table.version(),
                    rows: table.fields().len(),
                    missing_index_file: table.missing_index_file(),
                })
                .collect();
            print_json(&listed)?;
        }
        Command::Show { table, field } => {
            let table = registry.get(&table).ok_or_else(|| missing(&table))?;
            match field {
                Some(value) => {
                    let field = table
                        .get_field(&value)
                        .ok_or_else(|| anyhow!("no field with value {value} in {}", table.name()))?;
                    print_json(&field.describe())?;
                }
                None => print_json(&table.describe())?,
            }
        }
        Command::Query {
            table,
            column,
            value,
            return_column,
        } => {
            let table = registry.get(&table).ok_or_else(|| missing(&table))?;
            print_json(&table.get_entries(&column, &value, &return_column))?;
        }
        Command::Add {
            table,
            fields,
            persist,
            allow_duplicates,
        } => {
            let version = registry
                .table_mut(&table)?
                .add_entry(fields, allow_duplicates, persist, None)?;
            print_json(&version)?;
        }
        Command::Remove { table, fields } => {
            let version = registry.table_mut(&table)?.remove_entry(&fields)?;
            print_json(&version)?;
        }
        Command::Reload { names, path } => {
            let selector = match path {
                Some(path) => ReloadSelector::Path(path),
                None if names.is_empty() => ReloadSelector::All,
                None => ReloadSelector::Names(names),
            };
            print_json(&registry.reload(&selector)?)?;
        }
        Command::Install { path, persist } => {
            let import = registry.add_entries_from_config(
                &path,
                settings.shed_definitions.as_deref(),
                persist,
            )?;
            if let Some(message) = &import.error {
                error!(%message, "Install failed");
            }
            let names: Vec<_> = import
                .elements
                .iter()
                .filter_map(|element| element.attr("name"))
                .collect();
            print_json(&names)?;
        }
        Command::Snapshot { output } => {
            registry
                .to_json(&output)
                .with_context(|| format!("write snapshot to {}", output.display()))?;
        }
    }
    Ok(())
}

fn main() {
    let opts = Opts::parse();
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();
    if let Err(e) = run(opts) {
        error!(?e, "critical error");
        std::process::exit(1);
    }
}
