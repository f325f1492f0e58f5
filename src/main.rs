use anyhow::{Context, Result};
use std::env;
use std::path::Path;

use network_panel::{
    load_accounting_csv, load_edges_csv, load_nodes_csv, Pipeline, PipelineConfig,
    SqliteGraphStore,
};

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let args: Vec<String> = env::args().collect();

    match args.get(1).map(String::as_str) {
        Some("ingest") if args.len() == 5 => run_ingest(&args[2], &args[3], &args[4]),
        Some("run") if args.len() >= 4 => {
            run_pipeline(&args[2], &args[3], args.get(4).map(String::as_str))
        }
        _ => {
            print_usage();
            std::process::exit(2);
        }
    }
}

fn print_usage() {
    eprintln!("Usage:");
    eprintln!("  network-panel ingest <nodes.csv> <edges.csv> <store.db>");
    eprintln!("  network-panel run <store.db> <accounting.csv> [config.json]");
}

fn run_ingest(nodes_path: &str, edges_path: &str, store_path: &str) -> Result<()> {
    println!("🗄️  Ingesting graph CSVs into {}", store_path);

    let nodes = load_nodes_csv(Path::new(nodes_path))
        .with_context(|| format!("loading nodes from {}", nodes_path))?;
    println!("✓ Loaded {} nodes from CSV", nodes.len());

    let edges = load_edges_csv(Path::new(edges_path))
        .with_context(|| format!("loading edges from {}", edges_path))?;
    println!("✓ Loaded {} edges from CSV", edges.len());

    let store = SqliteGraphStore::create(Path::new(store_path))?;
    store.ingest_nodes(&nodes)?;
    store.ingest_edges(&edges)?;

    println!(
        "✓ Store ready: {} nodes, {} edges",
        store.node_count()?,
        store.edge_count()?
    );
    Ok(())
}

fn run_pipeline(store_path: &str, accounting_path: &str, config_path: Option<&str>) -> Result<()> {
    let config = match config_path {
        Some(path) => PipelineConfig::from_file(Path::new(path))
            .with_context(|| format!("loading config from {}", path))?,
        None => PipelineConfig::default(),
    };

    println!("🚰 Network feature pipeline");
    println!(
        "   Horizon: {}-{} | {}-month windows | lag {} periods",
        config.start_year, config.end_year, config.window_months, config.lag_periods
    );
    println!("   Params hash: {}", &config.params_hash()[..12]);

    let store = SqliteGraphStore::open(Path::new(store_path))?;
    let accounting = load_accounting_csv(Path::new(accounting_path))
        .with_context(|| format!("loading accounting from {}", accounting_path))?;
    println!("✓ Loaded {} accounting rows", accounting.len());

    let diagnostics = Pipeline::new(&store, &config).run(&accounting)?;

    println!("\n✅ Run complete");
    println!("   {}", diagnostics.summary());
    println!("   Panel: {}", config.output_dir.join("panel.csv").display());
    if diagnostics.periods_failed > 0 {
        println!(
            "⚠️  {} period(s) excluded after exhausting retries; see the manifest",
            diagnostics.periods_failed
        );
    }
    Ok(())
}
