use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, Result, bail};
use arrow::compute::concat_batches;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use skyjoin::catalog::{CatalogRef, assign_partitions, write_catalog};
use skyjoin::columnar::{decode_parquet, encode_parquet};
use skyjoin::config::Config;
use skyjoin::index::builder::build_index;
use skyjoin::index::store::save as save_index;
use skyjoin::pipeline::{CrossmatchRequest, Pipeline};
use skyjoin::storage::{LocalStore, ObjectStore};

#[derive(Parser)]
#[command(name = "skyjoin", about = "Crossmatch partitioned sky catalogs")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Crossmatch two catalogs and write the merged table.
    Crossmatch {
        /// Root directory of the left catalog.
        #[arg(long)]
        left: PathBuf,

        /// Root directory of the right catalog.
        #[arg(long)]
        right: PathBuf,

        /// Column prefix for the left catalog (defaults to its directory name).
        #[arg(long)]
        left_name: Option<String>,

        /// Column prefix for the right catalog (defaults to its directory name).
        #[arg(long)]
        right_name: Option<String>,

        /// Match radius in arcseconds.
        #[arg(long)]
        tolerance: Option<f64>,

        /// Bulk columns to fetch, comma separated (all if omitted).
        #[arg(long, value_delimiter = ',')]
        columns: Option<Vec<String>>,

        /// TOML configuration file.
        #[arg(long)]
        config: Option<PathBuf>,

        /// Write only the match catalog; no bulk partitions are read.
        #[arg(long)]
        matches_only: bool,

        /// Output parquet file.
        #[arg(short, long)]
        output: PathBuf,
    },

    /// Rebuild a catalog's index from its bulk partitions.
    BuildIndex {
        /// Root directory of the catalog.
        #[arg(long)]
        catalog: PathBuf,

        #[arg(long)]
        config: Option<PathBuf>,
    },

    /// Split a flat parquet file into a HEALPix-partitioned catalog.
    Partition {
        /// Flat parquet file with object_id, ra and dec columns.
        #[arg(long)]
        input: PathBuf,

        /// Root directory to write the catalog under.
        #[arg(long)]
        catalog: PathBuf,

        /// HEALPix depth of the partition keys.
        #[arg(long, default_value = "5")]
        depth: u8,

        #[arg(long)]
        config: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let store: Arc<dyn ObjectStore> = Arc::new(LocalStore::new("."));

    match &cli.command {
        Commands::Crossmatch {
            left,
            right,
            left_name,
            right_name,
            tolerance,
            columns,
            config,
            matches_only,
            output,
        } => {
            let mut config = load_config(config.as_deref())?;
            if let Some(t) = tolerance {
                config.crossmatch.tolerance_arcsec = *t;
            }
            let left = catalog_ref(left, left_name.as_deref(), &config)?;
            let right = catalog_ref(right, right_name.as_deref(), &config)?;
            let mut request = CrossmatchRequest::new(left, right, config.crossmatch.tolerance_arcsec);
            if let Some(columns) = columns {
                request = request.with_columns(columns.clone());
            }
            cmd_crossmatch(store, &config, &request, *matches_only, output).await
        }
        Commands::BuildIndex { catalog, config } => {
            let config = load_config(config.as_deref())?;
            let catalog = catalog_ref(catalog, None, &config)?;
            cmd_build_index(store.as_ref(), &catalog).await
        }
        Commands::Partition {
            input,
            catalog,
            depth,
            config,
        } => {
            let config = load_config(config.as_deref())?;
            let catalog = catalog_ref(catalog, None, &config)?;
            cmd_partition(store.as_ref(), input, &catalog, *depth).await
        }
    }
}

fn load_config(path: Option<&Path>) -> Result<Config> {
    match path {
        Some(p) => Config::from_file(p).with_context(|| format!("loading {}", p.display())),
        None => Ok(Config::default()),
    }
}

fn catalog_ref(root: &Path, name: Option<&str>, config: &Config) -> Result<CatalogRef> {
    let name = match name {
        Some(n) => n.to_string(),
        None => match root.file_name() {
            Some(n) => n.to_string_lossy().into_owned(),
            None => bail!("cannot derive a catalog name from {}; pass one explicitly", root.display()),
        },
    };
    Ok(CatalogRef::new(name, root.to_string_lossy()).with_layout(config.layout.clone()))
}

async fn cmd_crossmatch(
    store: Arc<dyn ObjectStore>,
    config: &Config,
    request: &CrossmatchRequest,
    matches_only: bool,
    output: &Path,
) -> Result<()> {
    let start = Instant::now();
    let pipeline = Pipeline::new(store, config.fetch.clone());

    let batch = if matches_only {
        let matches = pipeline.matches(request).await?;
        let stats = matches.stats();
        eprintln!(
            "{} pairs ({} candidates, {} dropped at partition boundaries, {} contested)",
            stats.matched, stats.candidates, stats.boundary_dropped, stats.contested
        );
        matches.to_record_batch(request.left.partition_column())?
    } else {
        pipeline.run(request).await?.to_record_batch()?
    };

    tokio::fs::write(output, encode_parquet(&batch)?)
        .await
        .with_context(|| format!("writing {}", output.display()))?;
    println!(
        "Wrote {} rows x {} columns to {} in {:.2}s",
        batch.num_rows(),
        batch.num_columns(),
        output.display(),
        start.elapsed().as_secs_f64()
    );
    Ok(())
}

async fn cmd_build_index(store: &dyn ObjectStore, catalog: &CatalogRef) -> Result<()> {
    let table = build_index(store, catalog).await?;
    let path = save_index(store, catalog, &table).await?;
    println!(
        "Indexed {} objects in {} partitions -> {path}",
        table.len(),
        table.partition_keys().len()
    );
    Ok(())
}

async fn cmd_partition(store: &dyn ObjectStore, input: &Path, catalog: &CatalogRef, depth: u8) -> Result<()> {
    let bytes = tokio::fs::read(input)
        .await
        .with_context(|| format!("reading {}", input.display()))?;
    let batches = decode_parquet(&catalog.name, bytes.into(), None)?;
    let Some(first) = batches.first() else {
        bail!("{} contains no rows", input.display());
    };
    let flat = concat_batches(&first.schema(), &batches)?;
    let partitioned = assign_partitions(catalog, &flat, depth)?;
    let summary = write_catalog(store, catalog, &partitioned).await?;
    println!(
        "Wrote {} rows into {} partitions under {}",
        summary.rows, summary.partitions, catalog.root
    );
    Ok(())
}
