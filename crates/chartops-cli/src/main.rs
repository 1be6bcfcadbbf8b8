//! Chartops CLI - drive Rancher catalog charts through watch-confirmed transitions

use clap::{Parser, Subcommand, ValueEnum};
use tracing_subscriber::EnvFilter;

mod commands;
mod error;
mod exit_codes;

use commands::context::{ConnectionArgs, Context};
use error::Result;

#[derive(Parser)]
#[command(name = "chartops")]
#[command(version)]
#[command(about = "Install, upgrade and uninstall Rancher catalog charts with watch-confirmed waits", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    #[command(flatten)]
    connection: ConnectionArgs,

    /// Enable debug output
    #[arg(long, global = true)]
    debug: bool,

    /// Log format
    #[arg(long, global = true, value_enum, default_value_t = LogFormat::Text, env = "CHARTOPS_LOG_FORMAT")]
    log_format: LogFormat,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Subcommand)]
enum Commands {
    /// Install a chart (and its CRD companion) and wait until deployed
    Install(commands::install::InstallArgs),

    /// Upgrade a chart and wait for pending-upgrade, then deployed
    Upgrade(commands::upgrade::UpgradeArgs),

    /// Uninstall a chart family and wait until every piece is gone
    Uninstall(commands::uninstall::UninstallArgs),

    /// Show the status of a chart
    Status(commands::status::StatusArgs),

    /// Install, upgrade and tear down the configured chart families
    Lifecycle(commands::lifecycle::LifecycleArgs),
}

fn init_tracing(debug: bool, format: LogFormat) {
    let default_filter = if debug {
        "debug,kube=info,hyper=warn"
    } else {
        "info,kube=warn,hyper=warn"
    };
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| default_filter.into());

    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr);
    match format {
        LogFormat::Json => subscriber.json().init(),
        LogFormat::Text => subscriber.init(),
    }
}

async fn run(cli: Cli) -> Result<()> {
    let ctx = Context::load(&cli.connection)?;

    match &cli.command {
        Commands::Install(args) => commands::install::run(&ctx, args).await,
        Commands::Upgrade(args) => commands::upgrade::run(&ctx, args).await,
        Commands::Uninstall(args) => commands::uninstall::run(&ctx, args).await,
        Commands::Status(args) => commands::status::run(&ctx, args).await,
        Commands::Lifecycle(args) => commands::lifecycle::run(&ctx, args).await,
    }
}

#[tokio::main]
async fn main() {
    // Setup miette for nice error display
    miette::set_panic_hook();

    let cli = Cli::parse();
    init_tracing(cli.debug, cli.log_format);

    if let Err(err) = run(cli).await {
        let code = err.exit_code();
        eprintln!("{:?}", miette::Report::new(err));
        std::process::exit(code);
    }
}
