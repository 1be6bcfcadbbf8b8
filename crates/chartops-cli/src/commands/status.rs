//! Status command

use chartops_kube::{ChartError, ChartStatus, SummaryState};
use clap::Args;
use console::style;

use super::context::{ChartArgs, Context};
use crate::error::Result;

#[derive(Args, Debug)]
pub struct StatusArgs {
    #[command(flatten)]
    pub chart: ChartArgs,

    /// Output as JSON
    #[arg(long)]
    pub json: bool,
}

/// Run the status command
pub async fn run(ctx: &Context, args: &StatusArgs) -> Result<()> {
    let spec = ctx.family_spec(&args.chart)?;
    let waits = ctx.waits(args.chart.timeout)?;
    let coordinator = ctx.coordinator(waits).await?;
    let driver = coordinator.driver();

    let mut statuses = vec![driver.status(&spec.name, &spec.namespace).await?];
    if let Some(crd) = spec.crd_chart_name() {
        statuses.push(driver.status(&crd, &spec.namespace).await?);
    }

    if args.json {
        let json = serde_json::to_string_pretty(&statuses).map_err(ChartError::from)?;
        println!("{}", json);
        return Ok(());
    }

    for status in &statuses {
        print_status(status);
    }
    Ok(())
}

fn print_status(status: &ChartStatus) {
    let state = match status.summary_state {
        SummaryState::Deployed => style(status.summary_state.as_str()).green(),
        SummaryState::Failed => style(status.summary_state.as_str()).red(),
        SummaryState::PendingInstall | SummaryState::PendingUpgrade => {
            style(status.summary_state.as_str()).yellow()
        }
        SummaryState::Unknown => style(status.summary_state.as_str()).dim(),
    };

    println!(
        "{} {}/{}",
        style("Chart:").bold(),
        status.namespace,
        style(&status.name).cyan()
    );
    if status.is_already_installed {
        println!("  State: {}", state);
    } else {
        println!("  State: {}", style("not installed").dim());
    }
}
