use anyhow::Context;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tallman_dashboard_lib::config::AppConfig;
use tallman_dashboard_lib::models::RefreshMode;

#[derive(Debug, Parser)]
#[command(name = "tallman-dashboard", about = "Metric refresh pipeline and dashboard API")]
struct Cli {
    /// YAML config file; environment variables override it.
    #[arg(long, global = true, env = "TALLMAN_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Serve the dashboard and admin API (default).
    Serve,
    /// Refresh every catalog metric once, in order, and exit.
    RefreshOnce {
        /// test or production; defaults to the configured mode.
        #[arg(long)]
        mode: Option<String>,
    },
    /// Write the cache store's metric definitions to a catalog file.
    ExportCatalog { path: PathBuf },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = AppConfig::load(cli.config.as_deref()).context("loading configuration")?;
    tallman_dashboard_lib::init_tracing(&config.log_dir)
        .map_err(|error| anyhow::anyhow!(error))
        .context("initializing logging")?;

    let app = tallman_dashboard_lib::bootstrap(config).context("starting refresh pipeline")?;
    match cli.command.unwrap_or(Command::Serve) {
        Command::Serve => tallman_dashboard_lib::serve(app).await?,
        Command::RefreshOnce { mode } => {
            let mode = match mode {
                Some(raw) => RefreshMode::parse(&raw)
                    .with_context(|| format!("unknown refresh mode '{}'", raw))?,
                None => app.config.initial_mode,
            };
            // Same transition as the driver: entering production clears test values first.
            app.controller.set_mode(mode).await.context("switching refresh mode")?;
            let summary = app.controller.refresh_all().await.context("refresh pass")?;
            println!("{}", serde_json::to_string_pretty(&summary)?);
        }
        Command::ExportCatalog { path } => {
            let count = tallman_dashboard_lib::catalog::export_definitions(app.controller.pipeline().db(), &path)?;
            println!("exported {} metrics to {}", count, path.display());
        }
    }
    Ok(())
}
