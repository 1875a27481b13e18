//! stackup is a CLI tool that bootstraps a local two-layer devnet: it derives
//! runtime configuration from live chain state, wires the derived values into
//! the downstream service configs, and brings the services up.

mod cli;

use std::sync::atomic::Ordering;

use anyhow::{Context, Result};
use clap::Parser;
use comfy_table::{Cell, Table, presets::UTF8_FULL};
use stackup_boot::{
    BOOTCONF_FILENAME, BootConfig, BootCtx, ConfigStore, DockerLauncher, DockerLauncherConfig,
    HttpChainReader, LaunchHandle, LaunchMode, PipelineReport, ServiceLauncher, ServiceSpec,
    fs, pipeline,
};

use cli::Cli;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize the logger.
    tracing_subscriber::fmt()
        .with_max_level(cli.verbosity)
        .init();

    // Load a saved configuration, or build one from CLI arguments.
    let boot = match &cli.config {
        Some(path) => {
            let boot = BootConfig::load_from_file(path)?;
            tracing::info!(
                config_path = %path.display(),
                workdir = %boot.workdir.display(),
                l1_rpc_url = boot.l1_rpc_url,
                "Loading bootstrap from config file..."
            );
            boot
        }
        None => BootConfig {
            l1_rpc_url: cli.l1_rpc_url.clone(),
            l2_rpc_url: cli.l2_rpc_url.clone(),
            workdir: cli.workdir.clone(),
            poll_max_attempts: cli.poll_max_attempts,
            poll_interval_secs: cli.poll_interval,
            artifact_timeout_secs: cli.artifact_timeout,
            detach: !cli.foreground,
            rollup_node_port: cli.rollup_node_port,
            ..Default::default()
        },
    };

    fs::ensure_dir(&boot.workdir)?;

    let mut store = ConfigStore::load(boot.base_env())
        .with_context(|| format!("failed to load {}", boot.base_env().display()))?;
    for (key, value) in cli.store_overrides() {
        store.set(key, &value);
    }

    let chain = HttpChainReader::new()?;

    if cli.dry_run {
        // Gates only; no chain access, no Docker, no file writes.
        let ctx = BootCtx::new(store, chain, NoopLauncher, boot);
        let seq = pipeline::sequencer();
        print_plan(&seq.plan(&ctx));
        return Ok(());
    }

    // Save the configuration next to the base env before running.
    boot.save_to_file(&boot.workdir.join(BOOTCONF_FILENAME))?;

    let launcher = DockerLauncher::new(DockerLauncherConfig {
        no_cleanup: cli.no_cleanup,
        ..Default::default()
    })
    .await?;

    let mut ctx = BootCtx::new(store, chain, launcher, boot);
    let mut seq = pipeline::sequencer();

    // First Ctrl-C aborts between stages; a running stage always finishes.
    let abort = seq.abort_flag();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Interrupt received, aborting after the current stage");
            abort.store(true, Ordering::SeqCst);
        }
    });

    let report = seq.run(&mut ctx).await;
    print_report(&report);

    if let Some(failed) = report.failed() {
        anyhow::bail!(
            "stage {} failed ({}): {}",
            failed.name,
            failed.error_kind.unwrap_or("error"),
            failed.error.as_deref().unwrap_or("unknown cause"),
        );
    }
    if report.aborted {
        anyhow::bail!("bootstrap aborted by operator");
    }

    tracing::info!("Bootstrap complete");
    Ok(())
}

/// Dry-run launcher: the launch stage is never reached, but the pipeline
/// context still needs a launcher type.
struct NoopLauncher;

impl ServiceLauncher for NoopLauncher {
    async fn launch(
        &mut self,
        _services: &[ServiceSpec],
        _mode: LaunchMode,
    ) -> stackup_boot::Result<Vec<LaunchHandle>> {
        Ok(Vec::new())
    }
}

fn print_plan(plan: &[(&'static str, bool)]) {
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .set_header(["Stage", "Would run"]);
    for (name, active) in plan {
        table.add_row([
            Cell::new(name),
            Cell::new(if *active { "yes" } else { "skipped" }),
        ]);
    }
    println!("{table}");
}

fn print_report(report: &PipelineReport) {
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .set_header(["Stage", "Status", "Error"]);
    for outcome in &report.outcomes {
        table.add_row([
            Cell::new(outcome.name),
            Cell::new(outcome.status),
            Cell::new(outcome.error.as_deref().unwrap_or("")),
        ]);
    }
    println!("{table}");
}
