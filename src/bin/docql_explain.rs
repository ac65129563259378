//! Optimizes a serialized plan and prints its explanation.
#![forbid(unsafe_code)]

use std::error::Error;
use std::path::PathBuf;

use clap::{Parser, ValueEnum};
use docql_optimizer::{InMemoryCatalog, Optimizer, OptimizerConfig, Plan, RuleId};
use tracing_subscriber::{fmt, EnvFilter};

#[derive(Parser, Debug)]
#[command(
    name = "docql-explain",
    version,
    about = "Optimize a logical query plan and explain the result"
)]
struct Cli {
    #[arg(long, value_name = "FILE", required_unless_present = "list_rules", help = "Plan JSON file")]
    plan: Option<PathBuf>,

    #[arg(long, value_name = "FILE", help = "Catalog JSON file describing collections and indexes")]
    catalog: Option<PathBuf>,

    #[arg(long, value_name = "FILE", help = "Optimizer TOML config")]
    config: Option<PathBuf>,

    #[arg(
        long = "rule",
        value_name = "DIRECTIVE",
        allow_hyphen_values = true,
        help = "Rule directive (+name, -name, +all, -all); repeatable, applied after the config file"
    )]
    rules: Vec<String>,

    #[arg(long, help = "Maximum optimizer passes")]
    max_passes: Option<usize>,

    #[arg(long, value_enum, default_value_t = OutputFormat::Text, help = "Output format")]
    format: OutputFormat,

    #[arg(long, env = "DOCQL_LOG", help = "Log filter, e.g. docql_optimizer=debug")]
    log_level: Option<String>,

    #[arg(long, help = "List the built-in rules in execution order and exit")]
    list_rules: bool,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum)]
enum OutputFormat {
    Text,
    Json,
}

fn main() {
    if let Err(err) = run() {
        eprintln!("error: {err}");
        std::process::exit(1);
    }
}

fn run() -> Result<(), Box<dyn Error>> {
    let cli = Cli::parse();
    install_tracing_subscriber(cli.log_level.as_deref())?;

    if cli.list_rules {
        for id in RuleId::ALL {
            println!("{:<34} {}", id.name(), id.build().description());
        }
        return Ok(());
    }

    let mut config = match &cli.config {
        Some(path) => OptimizerConfig::from_path(path)?,
        None => OptimizerConfig::default(),
    }
    .with_rule_overrides(cli.rules.iter().cloned());
    if let Some(max_passes) = cli.max_passes {
        config = config.with_max_passes(max_passes);
    }

    let catalog = match &cli.catalog {
        Some(path) => InMemoryCatalog::from_path(path)?,
        None => InMemoryCatalog::new(),
    };
    let plan_path = cli.plan.ok_or("--plan is required")?;
    let raw = std::fs::read_to_string(&plan_path)?;
    let plan: Plan = serde_json::from_str(&raw)?;

    let optimized = Optimizer::new(config)?.run(plan, &catalog)?;
    let explanation = optimized.explain();
    match cli.format {
        OutputFormat::Text => print!("{}", explanation.to_text()),
        OutputFormat::Json => println!("{}", explanation.to_json()?),
    }
    Ok(())
}

fn install_tracing_subscriber(level: Option<&str>) -> Result<(), Box<dyn Error>> {
    let filter = match level {
        Some(level) => EnvFilter::try_new(level)?,
        None => EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new("docql_optimizer=info")),
    };
    let _ = fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(true)
        .try_init();
    Ok(())
}
