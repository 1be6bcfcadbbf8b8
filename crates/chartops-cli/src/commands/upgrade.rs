//! Upgrade command - upgrade a chart family in place

use chartops_kube::{ChartError, ChartFamily, ClusterApi};
use clap::Args;
use console::style;

use super::context::{ChartArgs, Context};
use crate::error::Result;

#[derive(Args, Debug)]
pub struct UpgradeArgs {
    #[command(flatten)]
    pub chart: ChartArgs,

    /// Target version (configured upgradeVersion, then latest, when omitted)
    #[arg(long)]
    pub version: Option<String>,
}

/// Run the upgrade command
pub async fn run(ctx: &Context, args: &UpgradeArgs) -> Result<()> {
    let spec = ctx.family_spec(&args.chart)?;
    let waits = ctx.waits(args.chart.timeout)?;
    let coordinator = ctx.coordinator(waits).await?;
    let driver = coordinator.driver();

    let current = driver.status(&spec.name, &spec.namespace).await?;
    if !current.is_already_installed {
        return Err(ChartError::NotFound {
            kind: "chart".to_string(),
            name: format!("{}/{}", spec.namespace, spec.name),
        }
        .into());
    }

    let target = match args.version.as_ref().or(spec.upgrade_version.as_ref()) {
        Some(version) => version.clone(),
        None => {
            driver
                .cluster()
                .latest_chart_version(&spec.repo, &spec.name)
                .await?
        }
    };

    println!(
        "{} Upgrading {} in namespace {} to {}",
        style("→").blue().bold(),
        style(&spec.name).cyan(),
        style(&spec.namespace).yellow(),
        style(&target).yellow()
    );

    let family = ChartFamily::new(spec, target.clone());
    let status = coordinator.upgrade_family(&family, &target).await?;

    println!(
        "{} Upgraded {} to {} ({})",
        style("✓").green().bold(),
        style(&status.name).cyan(),
        style(&target).yellow(),
        style(status.summary_state).green()
    );
    Ok(())
}
