//! Lifecycle command - install, upgrade and tear down every configured family

use chartops_kube::{ChartFamilySpec, CleanupReport, ClusterApi, Coordinator, Session};
use clap::Args;
use console::style;
use tracing::info;

use super::context::Context;
use crate::error::{CliError, Result};

#[derive(Args, Debug)]
pub struct LifecycleArgs {
    /// Only run these configured charts (repeatable)
    #[arg(long = "chart")]
    pub charts: Vec<String>,

    /// Leave everything installed instead of tearing down
    #[arg(long)]
    pub keep: bool,

    /// Wait budget in seconds for every transition
    #[arg(long)]
    pub timeout: Option<u64>,
}

/// Run the lifecycle command
pub async fn run(ctx: &Context, args: &LifecycleArgs) -> Result<()> {
    let families: Vec<&ChartFamilySpec> = ctx
        .suite
        .charts
        .iter()
        .filter(|spec| args.charts.is_empty() || args.charts.contains(&spec.name))
        .collect();

    if families.is_empty() {
        return Err(CliError::usage_with_help(
            "no chart families selected",
            "add charts to the config file or check the --chart names",
        ));
    }

    let waits = ctx.waits(args.timeout)?;
    let coordinator = ctx.coordinator(waits).await?;
    let mut session = Session::new("lifecycle");

    let outcome = exercise(&coordinator, &families, &mut session).await;
    if let Err(e) = &outcome {
        eprintln!("{} {}", style("✗").red().bold(), e);
    }

    if args.keep {
        println!(
            "{} Keeping {} family(ies) installed",
            style("→").blue().bold(),
            session.pending()
        );
        return outcome;
    }

    println!(
        "\n{} Tearing down {} family(ies)",
        style("→").blue().bold(),
        session.pending()
    );
    let report = session.teardown_with_report(&coordinator).await;
    print_report(&report);

    outcome?;
    report.into_result().map_err(CliError::from)
}

async fn exercise<C: ClusterApi>(
    coordinator: &Coordinator<C>,
    families: &[&ChartFamilySpec],
    session: &mut Session,
) -> Result<()> {
    for spec in families {
        let family = coordinator.resolve(spec).await?;
        info!(chart = %family.name(), version = %family.version, "exercising chart family");
        println!(
            "{} Installing {} {}",
            style("→").blue().bold(),
            style(family.name()).cyan(),
            style(&family.version).yellow()
        );
        let status = coordinator.install_family(&family, session).await?;
        println!(
            "  {} {} ({})",
            style("✓").green().bold(),
            style(&status.name).cyan(),
            status.summary_state
        );

        if let Some(target) = &spec.upgrade_version {
            println!(
                "{} Upgrading {} to {}",
                style("→").blue().bold(),
                style(family.name()).cyan(),
                style(target).yellow()
            );
            let status = coordinator.upgrade_family(&family, target).await?;
            println!(
                "  {} {} ({})",
                style("✓").green().bold(),
                style(&status.name).cyan(),
                status.summary_state
            );
        }
    }
    Ok(())
}

fn print_report(report: &CleanupReport) {
    for bundle in &report.bundles {
        if bundle.succeeded() {
            println!(
                "  {} {} ({} step(s))",
                style("✓").green().bold(),
                bundle.bundle,
                bundle.completed.len()
            );
        } else if let Some(failure) = &bundle.failure {
            println!(
                "  {} {}: {} failed: {}",
                style("✗").red().bold(),
                bundle.bundle,
                failure.step,
                failure.error
            );
            for step in &bundle.skipped {
                println!("    {} skipped {}", style("•").dim(), step);
            }
        }
    }
}
