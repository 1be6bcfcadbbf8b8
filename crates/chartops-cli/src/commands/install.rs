//! Install command - install a chart family and wait until deployed

use std::path::PathBuf;

use chartops_kube::Session;
use clap::Args;
use console::style;

use super::context::{ChartArgs, Context, load_values};
use crate::error::Result;

#[derive(Args, Debug)]
pub struct InstallArgs {
    #[command(flatten)]
    pub chart: ChartArgs,

    /// Chart version (latest in the repository when omitted)
    #[arg(long)]
    pub version: Option<String>,

    /// Values file (YAML)
    #[arg(short = 'f', long = "values")]
    pub values: Option<PathBuf>,

    /// Create the namespace before installing
    #[arg(long)]
    pub create_namespace: bool,

    /// Remove whatever was provisioned if the install fails
    #[arg(long)]
    pub cleanup_on_failure: bool,
}

/// Run the install command
pub async fn run(ctx: &Context, args: &InstallArgs) -> Result<()> {
    let mut spec = ctx.family_spec(&args.chart)?;
    if let Some(version) = &args.version {
        spec.version = Some(version.clone());
    }
    if let Some(path) = &args.values {
        spec.values = load_values(path)?;
    }
    if args.create_namespace {
        spec.create_namespace = true;
    }
    let waits = ctx.waits(args.chart.timeout)?;

    let coordinator = ctx.coordinator(waits).await?;
    let family = coordinator.resolve(&spec).await?;

    println!(
        "{} Installing {} {} into namespace {}",
        style("→").blue().bold(),
        style(family.name()).cyan(),
        style(&family.version).yellow(),
        style(family.namespace()).yellow()
    );
    if let Some(crd) = spec.crd_chart_name() {
        println!("  CRD chart {} is submitted first", style(crd).cyan());
    }

    let mut session = Session::new(format!("install {}", family.name()));
    match coordinator.install_family(&family, &mut session).await {
        Ok(status) if session.pending() == 0 => {
            println!(
                "{} {} is already installed ({})",
                style("✓").green().bold(),
                style(&status.name).cyan(),
                status.summary_state
            );
            Ok(())
        }
        Ok(status) => {
            println!(
                "{} Installed {} ({})",
                style("✓").green().bold(),
                style(&status.name).cyan(),
                style(status.summary_state).green()
            );
            Ok(())
        }
        Err(e) => {
            eprintln!(
                "{} Install of {} failed",
                style("✗").red().bold(),
                style(family.name()).cyan()
            );
            if args.cleanup_on_failure {
                eprintln!("  Removing what was provisioned");
                if let Err(cleanup) = session.teardown(&coordinator).await {
                    eprintln!("  {}", cleanup);
                }
            }
            Err(e.into())
        }
    }
}
