//! `partsdesk`: command-line front end for the parts inventory.
//!
//! Every command prints its result as JSON on stdout.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand};
use directories::ProjectDirs;
use partsdesk_core::api::v1::{self, AddPartInput, ApiState, DeletePartsInput, EditCellInput, ExportInput};
use partsdesk_core::inventory::{InventoryStore, NewPart, PartFilter, PartId, Price};
use partsdesk_core::seed;
use partsdesk_core::settings::SettingsStore;
use serde::Serialize;
use tracing_subscriber::EnvFilter;

/// Car-parts inventory tool.
#[derive(Parser, Debug)]
#[command(name = "partsdesk", about = "Car-parts inventory")]
struct Cli {
    /// Directory holding inventory.db and settings.db.
    #[arg(long = "data-dir", env = "PARTSDESK_DATA_DIR", global = true)]
    data_dir: Option<PathBuf>,

    /// Product-name list loaded on startup when the catalog is empty.
    #[arg(long = "seed-file", env = "PARTSDESK_SEED_FILE", global = true)]
    seed_file: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// List parts, newest first.
    List {
        /// Substring matched against car name, model and product name.
        #[arg(long, short = 'q')]
        query: Option<String>,
    },

    /// Parts matching a category, a name and a price range; omitted terms
    /// are not applied.
    Filter {
        #[arg(long)]
        category: Option<String>,
        #[arg(long)]
        name: Option<String>,
        #[arg(long = "min-price")]
        min_price: Option<Price>,
        #[arg(long = "max-price")]
        max_price: Option<Price>,
    },

    /// Product names starting with a prefix.
    Suggest {
        prefix: String,
        #[arg(long)]
        limit: Option<usize>,
    },

    /// Add a part.
    Add {
        product_name: String,
        #[arg(long, default_value = "-")]
        category: String,
        #[arg(long = "car", default_value = "-")]
        car_name: String,
        #[arg(long, default_value = "-")]
        model: String,
        #[arg(long, default_value_t = 0)]
        quantity: i64,
        #[arg(long, default_value = "0")]
        price: Price,
        /// Replace a part with the same name.
        #[arg(long)]
        overwrite: bool,
    },

    /// Set one column of a part from text.
    Edit {
        id: PartId,
        field: String,
        value: String,
    },

    /// Reset one column of a part to empty or zero.
    Clear { id: PartId, field: String },

    /// Delete parts by id.
    Delete {
        #[arg(required = true)]
        ids: Vec<PartId>,
        #[arg(long)]
        chunk_size: Option<usize>,
    },

    /// Write parts to a CSV file.
    Export {
        path: PathBuf,
        #[arg(long, short = 'q')]
        query: Option<String>,
    },

    /// Parts at or below the low-stock threshold.
    LowStock,

    /// Show or change preferences.
    Settings {
        #[command(subcommand)]
        action: Option<SettingsAction>,
    },

    /// Recent catalog activity.
    Events {
        #[arg(long)]
        limit: Option<usize>,
    },

    /// Catalog health check.
    Status,

    /// Load product names from a file into an empty catalog.
    Seed { file: PathBuf },
}

#[derive(Subcommand, Debug)]
enum SettingsAction {
    Show,
    Set { key: String, value: String },
}

fn workspace_dir() -> PathBuf {
    if let Some(proj) = ProjectDirs::from("com", "PartsDesk", "PartsDesk") {
        proj.data_dir().to_path_buf()
    } else {
        std::env::temp_dir().join("PartsDesk")
    }
}

fn open_state(dir: &Path) -> Result<ApiState> {
    let inventory = InventoryStore::open_in_dir(dir)
        .with_context(|| format!("failed to open inventory in {}", dir.display()))?;
    let settings = SettingsStore::open(dir)?;
    Ok(ApiState {
        inventory: Arc::new(inventory),
        settings: Arc::new(settings),
    })
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn command_result<T: Serialize>(result: Result<T, String>) -> Result<()> {
    print_json(&result.map_err(|e| anyhow!(e))?)
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let dir = cli.data_dir.unwrap_or_else(workspace_dir);
    let state = open_state(&dir)?;
    tracing::debug!(dir = %dir.display(), "stores opened");

    if let Some(seed_file) = &cli.seed_file {
        match seed::seed_from_file(&state.inventory, seed_file) {
            Ok(outcome) => tracing::debug!(?outcome, "startup seeding"),
            Err(err) => tracing::warn!("startup seeding skipped: {err:#}"),
        }
    }

    let outcome = run(&state, cli.command).await;
    state.inventory.close();
    outcome
}

async fn run(state: &ApiState, command: Commands) -> Result<()> {
    match command {
        Commands::List { query } => command_result(v1::list_parts(state, query)),
        Commands::Filter {
            category,
            name,
            min_price,
            max_price,
        } => command_result(v1::filter_parts(
            state,
            PartFilter {
                category,
                name,
                min_price,
                max_price,
            },
        )),
        Commands::Suggest { prefix, limit } => {
            command_result(v1::suggest_product_names(state, &prefix, limit))
        }
        Commands::Add {
            product_name,
            category,
            car_name,
            model,
            quantity,
            price,
            overwrite,
        } => command_result(v1::add_part(
            state,
            AddPartInput {
                part: NewPart::new(category, car_name, model, product_name, quantity, price),
                overwrite,
            },
        )),
        Commands::Edit { id, field, value } => command_result(v1::edit_cell(
            state,
            EditCellInput {
                id,
                field,
                text: value,
            },
        )),
        Commands::Clear { id, field } => command_result(v1::clear_field(state, id, &field)),
        Commands::Delete { ids, chunk_size } => command_result(
            v1::delete_parts(state, DeletePartsInput { ids, chunk_size }).await,
        ),
        Commands::Export { path, query } => {
            command_result(v1::export_parts(state, ExportInput { path, q: query }))
        }
        Commands::LowStock => command_result(v1::low_stock(state)),
        Commands::Settings { action } => match action.unwrap_or(SettingsAction::Show) {
            SettingsAction::Show => print_json(&state.settings.all()?),
            SettingsAction::Set { key, value } => {
                state.settings.set(&key, &value)?;
                command_result(v1::get_settings(state))
            }
        },
        Commands::Events { limit } => command_result(v1::recent_events(state, limit)),
        Commands::Status => command_result(v1::catalog_status(state)),
        Commands::Seed { file } => print_json(&seed::seed_from_file(&state.inventory, &file)?),
    }
}
