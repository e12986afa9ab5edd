//! Administrative CLI for template store associations.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use depot_core::config::AppConfig;
use depot_core::{DataStoreRole, StoreId, TemplateId, ZoneScope};
use depot_metadata::AssociationStore;
use depot_metadata::models::TemplateStoreRow;
use figment::Figment;
use figment::providers::{Env, Format, Toml};
use serde::Serialize;
use std::io::Write;
use std::path::Path;
use time::format_description::well_known::Rfc3339;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use uuid::Uuid;

#[derive(Parser)]
#[command(name = "depotctl")]
#[command(about = "Administrative CLI for template store associations")]
#[command(version)]
struct Cli {
    /// Path to configuration file
    #[arg(long, env = "DEPOT_CONFIG", default_value = "config/depot.toml")]
    config: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List records on a store
    List {
        #[arg(long)]
        store: StoreId,
        /// List soft-deleted records instead of live ones
        #[arg(long, default_value_t = false)]
        destroyed: bool,
    },
    /// List referenced records on a cache store (not evictable)
    ActiveOnCache {
        #[arg(long)]
        store: StoreId,
    },
    /// List live records of a template
    ListTemplate {
        #[arg(long)]
        template: TemplateId,
    },
    /// Find a template's record in a zone
    Find {
        #[arg(long)]
        template: TemplateId,
        /// Zone id, or `all`
        #[arg(long, default_value = "all")]
        zone: ZoneScope,
        #[arg(long, value_enum, default_value_t = RoleArg::Image)]
        role: RoleArg,
    },
    /// Copy every image cache record onto a new region-wide image store
    PromoteRegionStore {
        #[arg(long)]
        store: StoreId,
    },
    /// Relabel every live record on a store as an image cache record
    RelabelCache {
        #[arg(long)]
        store: StoreId,
    },
    /// Hard-delete every record on a store
    PurgeStore {
        #[arg(long)]
        store: StoreId,
    },
    /// Hard-delete every record of a template
    PurgeTemplate {
        #[arg(long)]
        template: TemplateId,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum RoleArg {
    Image,
    ImageCache,
}

impl From<RoleArg> for DataStoreRole {
    fn from(role: RoleArg) -> Self {
        match role {
            RoleArg::Image => DataStoreRole::Image,
            RoleArg::ImageCache => DataStoreRole::ImageCache,
        }
    }
}

/// JSON view of a record.
#[derive(Debug, Serialize)]
struct RecordView {
    id: Uuid,
    template_id: TemplateId,
    store_id: StoreId,
    role: String,
    state: String,
    download_state: String,
    download_percent: i32,
    install_path: Option<String>,
    size: i64,
    physical_size: i64,
    ref_cnt: i64,
    destroyed: bool,
    version: i64,
    updated_at: String,
}

impl RecordView {
    fn from_row(row: &TemplateStoreRow) -> Result<Self> {
        Ok(Self {
            id: row.id,
            template_id: row.template_id,
            store_id: row.store_id,
            role: row.store_role.clone(),
            state: row.state.clone(),
            download_state: row.download_state.clone(),
            download_percent: row.download_percent,
            install_path: row.install_path.clone(),
            size: row.size,
            physical_size: row.physical_size,
            ref_cnt: row.ref_cnt,
            destroyed: row.destroyed,
            version: row.updated_count,
            updated_at: row.updated_at.format(&Rfc3339)?,
        })
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let Cli { config, command } = Cli::parse();

    let config = load_config(Path::new(&config))?;
    let store = depot_metadata::open(&config)
        .await
        .context("failed to open metadata store")?;

    let stdout = std::io::stdout();
    run(&store, command, &mut stdout.lock()).await
}

async fn run(store: &AssociationStore, command: Commands, out: &mut impl Write) -> Result<()> {
    match command {
        Commands::List { store: id, destroyed } => {
            let rows = if destroyed {
                store.list_destroyed(id).await?
            } else {
                store.list_by_store(id).await?
            };
            write_records(out, &rows)?;
        }
        Commands::ActiveOnCache { store: id } => {
            write_records(out, &store.list_active_on_cache(id).await?)?;
        }
        Commands::ListTemplate { template } => {
            write_records(out, &store.list_by_template(template).await?)?;
        }
        Commands::Find {
            template,
            zone,
            role,
        } => {
            let found = store
                .find_by_template_zone(template, zone, role.into())
                .await?;
            match found {
                Some(row) => write_records(out, std::slice::from_ref(&row))?,
                // Absent is not an error
                None => {
                    tracing::debug!(template_id = template, %zone, "No record found");
                    writeln!(out, "null")?;
                }
            }
        }
        Commands::PromoteRegionStore { store: id } => {
            let report = store
                .duplicate_cache_records_on_region_store(id)
                .await
                .with_context(|| format!("failed to promote cache records onto store {id}"))?;
            writeln!(
                out,
                "{}",
                serde_json::json!({
                    "store_id": id,
                    "records_created": report.records_created,
                    "templates_promoted": report.templates_promoted,
                })
            )?;
        }
        Commands::RelabelCache { store: id } => {
            let updated = store.update_store_role_to_cache(id).await?;
            writeln!(out, "{}", serde_json::json!({ "store_id": id, "relabelled": updated }))?;
        }
        Commands::PurgeStore { store: id } => {
            let deleted = store.delete_for_store(id).await?;
            writeln!(out, "{}", serde_json::json!({ "store_id": id, "deleted": deleted }))?;
        }
        Commands::PurgeTemplate { template } => {
            let deleted = store.delete_for_template(template).await?;
            writeln!(
                out,
                "{}",
                serde_json::json!({ "template_id": template, "deleted": deleted })
            )?;
        }
    }
    Ok(())
}

fn write_records(out: &mut impl Write, rows: &[TemplateStoreRow]) -> Result<()> {
    for row in rows {
        writeln!(out, "{}", serde_json::to_string(&RecordView::from_row(row)?)?)?;
    }
    Ok(())
}

/// Load configuration from an optional TOML file merged with `DEPOT_*` env vars.
fn load_config(path: &Path) -> Result<AppConfig> {
    let mut figment = Figment::new();

    if path.exists() {
        tracing::debug!(config_path = %path.display(), "Loading configuration from file");
        figment = figment.merge(Toml::file(path));
    }

    figment = figment.merge(Env::prefixed("DEPOT_").ignore(&["CONFIG"]).split("__"));

    figment
        .extract()
        .context("failed to load configuration")
}
