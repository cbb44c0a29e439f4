//! Plan explainer binary
//!
//! Usage: shardplan_explain --catalog catalog.json [options] "SELECT ..."
//!
//! Exit codes:
//!   0 - Success
//!   1 - The statement could not be planned
//!   2 - Catalog or estimates could not be loaded
//!   3 - Internal planner error

use std::fs;
use std::path::PathBuf;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use shardplan::catalog::{Catalog, DatabaseEstimates};
use shardplan::config::{parse_table_limit, PlannerConfig};
use shardplan::planner::{
    CostModel, DefaultCostModel, ExplainOutput, PartitioningForStatement, QueryPlanner,
    TrivialCostModel,
};

#[derive(Parser)]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Compile a SQL statement and print the chosen plan")]
struct Cli {
    /// Catalog JSON file
    #[arg(long, env = "SHARDPLAN_CATALOG")]
    catalog: PathBuf,

    /// Table row estimates JSON file
    #[arg(long)]
    estimates: Option<PathBuf>,

    /// Comma-separated join order, outermost table first
    #[arg(long)]
    join_order: Option<String>,

    /// Tables a statement may join without a join order
    #[arg(long, env = "SHARDPLAN_MAX_TABLES_PER_JOIN", value_parser = parse_table_limit)]
    max_tables_per_join: Option<usize>,

    /// Directory for per-candidate debug artifacts
    #[arg(long, env = "SHARDPLAN_DEBUG_DIR")]
    debug_dir: Option<PathBuf>,

    /// Plan as a single-partition statement
    #[arg(long)]
    single_partition: bool,

    /// Score every plan zero and keep the first candidate
    #[arg(long)]
    trivial_cost: bool,

    /// Statement to plan
    sql: String,
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let catalog = match fs::read_to_string(&cli.catalog)
        .map_err(|e| e.to_string())
        .and_then(|json| Catalog::from_json(&json).map_err(|e| e.to_string()))
    {
        Ok(catalog) => catalog,
        Err(e) => {
            eprintln!("ERROR: Failed to load catalog {}: {}", cli.catalog.display(), e);
            std::process::exit(2);
        }
    };

    let estimates = match &cli.estimates {
        None => DatabaseEstimates::new(),
        Some(path) => match fs::read_to_string(path)
            .map_err(|e| e.to_string())
            .and_then(|json| DatabaseEstimates::from_json(&json).map_err(|e| e.to_string()))
        {
            Ok(estimates) => estimates,
            Err(e) => {
                eprintln!("ERROR: Failed to load estimates {}: {}", path.display(), e);
                std::process::exit(2);
            }
        },
    };

    let mut config = PlannerConfig::from_env();
    if let Some(max) = cli.max_tables_per_join {
        config.max_tables_per_join = max;
    }
    if cli.debug_dir.is_some() {
        config.debug_dir = cli.debug_dir.clone();
    }

    let partitioning = if cli.single_partition {
        PartitioningForStatement::forced_single()
    } else {
        PartitioningForStatement::inferred()
    };
    let planner = QueryPlanner::from_config(&catalog, &config)
        .with_estimates(estimates)
        .with_partitioning(partitioning);

    let mut request = planner.request(cli.sql.clone());
    if let Some(order) = &cli.join_order {
        request = request.join_order(order.clone());
    }

    let cost_model: &dyn CostModel = if cli.trivial_cost {
        &TrivialCostModel
    } else {
        &DefaultCostModel
    };

    match planner.compile_plan(cost_model, &request) {
        Ok(plan) => {
            println!("{}", plan.explained_plan.as_deref().unwrap_or_default());
            println!("cost: {:.2}", plan.cost);
            println!("single partition: {}", plan.single_partition);
            println!(
                "deterministic: content={} order={}",
                plan.content_deterministic, plan.order_deterministic
            );
            println!();
            print!("{}", ExplainOutput::format_fragments(&plan.fragments));
        }
        Err(e) if e.is_user_facing() => {
            eprintln!("ERROR: {}", e);
            std::process::exit(1);
        }
        Err(e) => {
            eprintln!("ERROR: {}", e);
            std::process::exit(3);
        }
    }
}
