use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};

mod commands;

#[derive(Parser)]
#[command(
    name = "tierform",
    about = "tierform — provision a three-tier container application and its delivery pipeline",
    version,
    propagate_version = true,
)]
struct Cli {
    /// Configuration file (defaults apply when it does not exist).
    #[arg(long, global = true, default_value = "tierform.toml")]
    config: PathBuf,

    /// Directory holding the state store.
    #[arg(long, global = true, default_value = ".tierform")]
    state_dir: PathBuf,

    /// Context value, e.g. `-c usePipelineImage=true`. Repeatable; wins
    /// over `[context]` in the configuration file.
    #[arg(short = 'c', long = "context", global = true, value_parser = parse_context)]
    context: Vec<(String, String)>,

    #[arg(long, global = true, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, PartialEq, Eq, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the synthesized templates, one per stack.
    Synth {
        /// Only this stack (registry, application, delivery).
        #[arg(long)]
        stack: Option<String>,
        /// Write `<stack>.template.json` files here instead of stdout.
        #[arg(short, long)]
        out: Option<PathBuf>,
    },
    /// Provision the environment.
    Deploy,
    /// Show recorded resources, workflow executions, services and pipeline runs.
    Status {
        /// Output format: text or json
        #[arg(short, long, default_value = "text")]
        format: String,
    },
    /// Show the environment outputs.
    Outputs,
    /// Run the delivery pipeline.
    Pipeline {
        #[command(subcommand)]
        action: PipelineAction,
    },
    /// Evaluate CPU target tracking for the environment's services.
    Autoscale {
        /// Record this average CPU utilization for every service first.
        #[arg(long)]
        cpu: Option<f64>,
        /// Keep evaluating until interrupted.
        #[arg(long)]
        watch: bool,
        /// Evaluation interval in seconds when watching.
        #[arg(long, default_value = "30")]
        interval: u64,
    },
}

#[derive(Subcommand)]
enum PipelineAction {
    /// Execute source, build and deploy for a pushed revision.
    Run {
        /// Commit id at the head of the configured branch.
        #[arg(long)]
        revision: String,
    },
}

fn parse_context(s: &str) -> Result<(String, String), String> {
    tierform_core::DeployContext::parse_pair(s).map_err(|e| e.to_string())
}

fn init_tracing(format: LogFormat) -> anyhow::Result<()> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .or_else(|_| tracing_subscriber::EnvFilter::try_new("tierform=info"))?;
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    match format {
        LogFormat::Text => builder.init(),
        LogFormat::Json => builder.json().init(),
    }
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_format)?;

    let workspace = commands::Workspace::load(&cli.config, &cli.state_dir, cli.context)?;

    match cli.command {
        Commands::Synth { stack, out } => commands::synth::synth(&workspace, stack.as_deref(), out.as_deref()),
        Commands::Deploy => commands::deploy::deploy(&workspace).await,
        Commands::Status { format } => commands::status::status(&workspace, &format),
        Commands::Outputs => commands::deploy::outputs(&workspace),
        Commands::Pipeline { action } => match action {
            PipelineAction::Run { revision } => commands::pipeline::run(&workspace, &revision).await,
        },
        Commands::Autoscale { cpu, watch, interval } => {
            commands::autoscale::autoscale(&workspace, cpu, watch, interval).await
        }
    }
}
