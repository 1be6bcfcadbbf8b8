//! Uninstall command - remove a chart family, primary chart first

use chartops_kube::ChartFamily;
use clap::Args;
use console::style;

use super::context::{ChartArgs, Context};
use crate::error::Result;

#[derive(Args, Debug)]
pub struct UninstallArgs {
    #[command(flatten)]
    pub chart: ChartArgs,

    /// Also delete the namespace once the charts are gone
    #[arg(long)]
    pub delete_namespace: bool,

    /// Print the teardown steps without running them
    #[arg(long)]
    pub dry_run: bool,
}

/// Run the uninstall command
pub async fn run(ctx: &Context, args: &UninstallArgs) -> Result<()> {
    let mut spec = ctx.family_spec(&args.chart)?;
    if args.delete_namespace {
        spec.create_namespace = true;
    }
    let version = spec.version.clone().unwrap_or_default();
    let family = ChartFamily::new(spec, version);
    let bundle = family.teardown_bundle();

    println!(
        "{} Uninstalling {} from namespace {}",
        style("→").blue().bold(),
        style(family.name()).cyan(),
        style(family.namespace()).yellow()
    );
    for action in bundle.actions() {
        println!("  {} {}", style("•").dim(), action);
    }

    if args.dry_run {
        println!(
            "{} Dry run - {} step(s) would run",
            style("✓").green().bold(),
            bundle.len()
        );
        return Ok(());
    }

    let waits = ctx.waits(args.chart.timeout)?;
    let coordinator = ctx.coordinator(waits).await?;
    coordinator.teardown(bundle).await?;

    println!(
        "{} Successfully uninstalled {}",
        style("✓").green().bold(),
        style(family.name()).cyan()
    );
    Ok(())
}
