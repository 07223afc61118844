//! Ragroute CLI - adaptive handler routing for retrieval agents

use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use ragroute_core::analyzer::AnalysisReport;
use ragroute_core::config::Config;
use ragroute_core::handlers::{DryRunHandler, HandlerRegistry};
use ragroute_core::orchestrator::{Orchestrator, RouteOutcome};
use ragroute_core::routing::{Category, classify_with_scores};
use serde::Serialize;
use tracing::debug;

#[derive(Parser)]
#[command(name = "ragroute")]
#[command(author, version, about = "Adaptive handler routing for retrieval agents", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Output format (text or json)
    #[arg(long, global = true, default_value = "text")]
    format: OutputFormat,

    /// Quiet mode (minimal output)
    #[arg(short, long, global = true)]
    quiet: bool,
}

#[derive(Clone, Copy, Default, PartialEq, Eq, clap::ValueEnum)]
enum OutputFormat {
    #[default]
    Text,
    Json,
}

#[derive(Subcommand)]
enum Commands {
    /// Show which category a question falls into
    Classify {
        question: String,
    },

    /// Route a question and record the decision
    Route {
        question: String,
        /// Use this handler instead of asking the bandit
        #[arg(long)]
        handler: Option<String>,
        /// Number of sources to retrieve
        #[arg(short = 'k', long)]
        top_k: Option<usize>,
    },

    /// Run several handlers side by side without recording anything
    Compare {
        question: String,
        /// Comma-separated handler ids
        #[arg(long, value_delimiter = ',', required = true)]
        handlers: Vec<String>,
        #[arg(short = 'k', long)]
        top_k: Option<usize>,
    },

    /// Rate a previous answer
    Feedback {
        interaction_id: String,
        /// Reward between 0.0 and 1.0
        reward: f64,
    },

    /// Show routing statistics
    Stats {
        /// Only this category
        #[arg(short, long)]
        category: Option<Category>,
    },

    /// Rank handlers by average reward
    Leaderboard,

    /// Analyze the interaction ledger
    Optimize,

    /// List available handlers
    Handlers,

    /// Reset routing statistics to the priors
    Reset {
        #[arg(long)]
        force: bool,
    },

    /// Configuration management
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Get a configuration value
    Get { key: String },
    /// Set a configuration value
    Set { key: String, value: String },
    /// List all configuration values
    List,
    /// Reset configuration to defaults
    Reset,
    /// Show configuration file path
    Path,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("ragroute=info".parse()?),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let out = Output {
        format: cli.format,
        quiet: cli.quiet,
    };

    match cli.command {
        Commands::Classify { question } => cmd_classify(&question, out),

        Commands::Route {
            question,
            handler,
            top_k,
        } => cmd_route(&question, handler.as_deref(), top_k, out).await,

        Commands::Compare {
            question,
            handlers,
            top_k,
        } => cmd_compare(&question, &handlers, top_k, out).await,

        Commands::Feedback {
            interaction_id,
            reward,
        } => cmd_feedback(&interaction_id, reward, out).await,

        Commands::Stats { category } => cmd_stats(category, out).await,

        Commands::Leaderboard => cmd_leaderboard(out).await,

        Commands::Optimize => cmd_optimize(out).await,

        Commands::Handlers => cmd_handlers(out).await,

        Commands::Reset { force } => cmd_reset(force, out).await,

        Commands::Config { action } => cmd_config(action, out),
    }
}

#[derive(Clone, Copy)]
struct Output {
    format: OutputFormat,
    quiet: bool,
}

impl Output {
    fn json(&self) -> bool {
        self.format == OutputFormat::Json
    }

    fn print_json<T: Serialize>(&self, value: &T) -> anyhow::Result<()> {
        println!(
            "{}",
            serde_json::to_string_pretty(value).context("Failed to serialize output")?
        );
        Ok(())
    }
}

/// Orchestrator over the dry-run handlers with state from the configured data dir
async fn open_orchestrator() -> anyhow::Result<Orchestrator> {
    let config = Config::load()?;
    let data_dir = config.data_dir()?;
    debug!(data_dir = %data_dir.display(), "Opening ragroute state");

    let mut registry = HandlerRegistry::new();
    for handler in DryRunHandler::defaults() {
        registry.register(Arc::new(handler));
    }

    Orchestrator::builder(registry)
        .router_config(config.router.clone())
        .data_dir(&data_dir)
        .file_names(
            config.storage.state_file.clone(),
            config.storage.ledger_file.clone(),
        )
        .config(config.orchestrator.clone())
        .analyzer(config.analyzer.clone())
        .build()
        .await
        .with_context(|| format!("Failed to open ragroute state in {}", data_dir.display()))
}

// ============================================================================
// Command Implementations
// ============================================================================

fn cmd_classify(question: &str, out: Output) -> anyhow::Result<()> {
    let (category, scores) = classify_with_scores(question);

    if out.json() {
        return out.print_json(&serde_json::json!({
            "question": question,
            "category": category,
            "scores": scores,
        }));
    }

    println!("{}", category);
    if !out.quiet {
        for (category, score) in scores.iter().filter(|(_, s)| **s > 0) {
            println!("  {}: {} pattern group(s)", category, score);
        }
    }
    Ok(())
}

async fn cmd_route(
    question: &str,
    handler: Option<&str>,
    top_k: Option<usize>,
    out: Output,
) -> anyhow::Result<()> {
    let orchestrator = open_orchestrator().await?;
    let result = orchestrator.route(question, handler, top_k).await?;
    orchestrator.shutdown().await?;

    if out.json() {
        return out.print_json(&result);
    }

    if out.quiet {
        println!("{}", result.interaction_id);
        return Ok(());
    }

    println!("Interaction: {}", result.interaction_id);
    println!("  Category: {}", result.category);
    if result.manual_override {
        println!("  Handler:  {} (manual override)", result.handler);
    } else {
        println!("  Handler:  {}", result.handler);
    }
    if let Some(rejected) = &result.routing.rejected_override {
        println!("  Ignored unknown handler: {}", rejected);
    }
    for (handler, score) in &result.routing.scores {
        println!(
            "    {:<22} score {:.3}  avg {:.3}  bonus {:.3}  pulls {}",
            handler, score.score, score.average_reward, score.exploration_bonus, score.pulls
        );
    }
    match &result.outcome {
        RouteOutcome::Answered(output) => {
            println!();
            println!("{}", output.answer);
        }
        RouteOutcome::Failed { code, error } => {
            println!();
            println!("Handler failed [{}]: {}", code, error);
        }
    }
    println!();
    println!("{}", result.feedback_hint);
    Ok(())
}

async fn cmd_compare(
    question: &str,
    handlers: &[String],
    top_k: Option<usize>,
    out: Output,
) -> anyhow::Result<()> {
    let orchestrator = open_orchestrator().await?;
    let names: Vec<&str> = handlers.iter().map(String::as_str).collect();
    let comparison = orchestrator.compare(question, &names, top_k).await;

    if out.json() {
        return out.print_json(&comparison);
    }

    if !out.quiet {
        println!("Category: {}", comparison.category);
    }
    for entry in &comparison.results {
        match &entry.outcome {
            RouteOutcome::Answered(output) => {
                println!("[{}] ({} sources) {}", entry.handler, output.source_count, output.answer)
            }
            RouteOutcome::Failed { code, error } => {
                println!("[{}] error {}: {}", entry.handler, code, error)
            }
        }
    }
    Ok(())
}

async fn cmd_feedback(interaction_id: &str, reward: f64, out: Output) -> anyhow::Result<()> {
    let orchestrator = open_orchestrator().await?;
    let receipt = match orchestrator.submit_feedback(interaction_id, reward).await {
        Ok(receipt) => receipt,
        Err(e) => {
            let hint = e.suggestion();
            let err = anyhow::Error::new(e);
            return Err(match hint {
                Some(hint) => err.context(format!("Hint: {}", hint)),
                None => err,
            });
        }
    };
    orchestrator.shutdown().await?;

    if out.json() {
        return out.print_json(&receipt);
    }
    if !out.quiet {
        println!(
            "Feedback recorded: {} / {} += {}",
            receipt.category, receipt.handler, receipt.reward
        );
        println!(
            "  pulls {}  total {:.3}  avg {:.3}",
            receipt.arm.pulls, receipt.arm.total_reward, receipt.arm.average_reward
        );
    }
    Ok(())
}

async fn cmd_stats(category: Option<Category>, out: Output) -> anyhow::Result<()> {
    let orchestrator = open_orchestrator().await?;
    let mut stats = orchestrator.stats().await;
    if let Some(category) = category {
        stats.retain(|c, _| *c == category);
    }

    if out.json() {
        return out.print_json(&stats);
    }

    let summary = orchestrator.router().summary().await;
    if !out.quiet {
        println!(
            "Routing Statistics ({} arms, {} pulls, avg reward {:.3}):",
            summary.handler_count,
            summary.total_pulls,
            summary.average_reward()
        );
    }
    for (category, arms) in &stats {
        println!("{}", category);
        for (handler, arm) in arms {
            println!(
                "  {:<22} pulls {:>5}  total {:>8.3}  avg {:.3}",
                handler, arm.pulls, arm.total_reward, arm.average_reward
            );
        }
    }
    Ok(())
}

async fn cmd_leaderboard(out: Output) -> anyhow::Result<()> {
    let orchestrator = open_orchestrator().await?;
    let leaderboard = orchestrator.leaderboard().await;

    if out.json() {
        return out.print_json(&leaderboard);
    }

    if !out.quiet {
        println!("{:<4} {:<22} {:>7} {:>8} {:>5}", "#", "handler", "pulls", "avg", "wins");
    }
    for (rank, entry) in leaderboard.iter().enumerate() {
        println!(
            "{:<4} {:<22} {:>7} {:>8.3} {:>5}",
            rank + 1,
            entry.handler,
            entry.total_pulls,
            entry.average_reward,
            entry.categories_won
        );
    }
    Ok(())
}

async fn cmd_optimize(out: Output) -> anyhow::Result<()> {
    let orchestrator = open_orchestrator().await?;
    let report = orchestrator.optimize().await;

    if out.json() {
        return out.print_json(&report);
    }

    match report {
        AnalysisReport::InsufficientData { message, .. } => println!("{}", message),
        AnalysisReport::Report(analysis) => {
            if !out.quiet {
                println!(
                    "Analyzed {} entries: {} decisions, {} rated, {} orphaned feedback",
                    analysis.total_entries,
                    analysis.decisions,
                    analysis.joined_feedback,
                    analysis.orphaned_feedback
                );
                println!();
                println!("Recommendations:");
            }
            if analysis.recommendations.is_empty() && !out.quiet {
                println!("  (none)");
            }
            for recommendation in &analysis.recommendations {
                println!("  - {}", recommendation);
            }
        }
    }
    Ok(())
}

async fn cmd_handlers(out: Output) -> anyhow::Result<()> {
    let orchestrator = open_orchestrator().await?;
    let handlers = orchestrator.handlers();

    if out.json() {
        return out.print_json(&handlers);
    }
    for info in &handlers {
        if out.quiet {
            println!("{}", info.id);
        } else {
            println!("{:<22} {}", info.id, info.description);
        }
    }
    Ok(())
}

async fn cmd_reset(force: bool, out: Output) -> anyhow::Result<()> {
    if !force {
        anyhow::bail!("Refusing to reset learned statistics without --force");
    }
    let orchestrator = open_orchestrator().await?;
    orchestrator.reset().await;
    orchestrator.shutdown().await?;

    if !out.quiet {
        println!("Routing statistics reset to priors.");
    }
    Ok(())
}

fn cmd_config(action: ConfigAction, out: Output) -> anyhow::Result<()> {
    match action {
        ConfigAction::Get { key } => {
            let config = Config::load()?;
            let value = config.get(&key)?;
            println!("{}", value);
        }
        ConfigAction::Set { key, value } => {
            let mut config = Config::load()?;
            config.set(&key, &value)?;
            config.save()?;
            if !out.quiet {
                println!("Set {} = {}", key, value);
            }
        }
        ConfigAction::List => {
            let config = Config::load()?;
            let items = config.list()?;
            if out.json() {
                let map: std::collections::BTreeMap<_, _> = items.into_iter().collect();
                return out.print_json(&map);
            }
            for (key, value) in items {
                println!("{} = {}", key, value);
            }
        }
        ConfigAction::Reset => {
            Config::reset()?;
            if !out.quiet {
                println!("Configuration reset to defaults.");
            }
        }
        ConfigAction::Path => {
            let path = Config::config_path()?;
            println!("{}", path.display());
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_compare_splits_handlers() {
        let cli = Cli::try_parse_from([
            "ragroute",
            "compare",
            "What is RAG?",
            "--handlers",
            "naive_rag,hyde_rag",
        ])
        .unwrap();
        match cli.command {
            Commands::Compare { handlers, top_k, .. } => {
                assert_eq!(handlers, ["naive_rag", "hyde_rag"]);
                assert_eq!(top_k, None);
            }
            _ => panic!("expected compare"),
        }
    }

    #[test]
    fn test_stats_parses_category() {
        let cli = Cli::try_parse_from(["ragroute", "--format", "json", "stats", "-c", "visual"])
            .unwrap();
        assert!(cli.format == OutputFormat::Json);
        assert!(matches!(
            cli.command,
            Commands::Stats {
                category: Some(Category::Visual)
            }
        ));
        assert!(Cli::try_parse_from(["ragroute", "stats", "-c", "musical"]).is_err());
    }

    #[test]
    fn test_route_flags() {
        let cli = Cli::try_parse_from([
            "ragroute",
            "route",
            "Compare revenue by region",
            "--handler",
            "table_rag",
            "-k",
            "8",
        ])
        .unwrap();
        assert!(matches!(
            cli.command,
            Commands::Route { handler: Some(ref h), top_k: Some(8), .. } if h == "table_rag"
        ));
    }
}
