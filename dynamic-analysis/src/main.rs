use std::env;
use std::process::ExitCode;

use anyhow::{Context, Result};
use tracing::{error, info};

use dynamic_analysis::sandbox::Container;
use dynamic_analysis::{AnalysisEngine, Config, DynamicAnalyzer, PhaseResults};
use shared::observability::init_logging;
use shared::{Ecosystem, Package};

const SERVICE_NAME: &str = "dynamic-analysis";

/// Target package from `PACKAGE_ECOSYSTEM`, `PACKAGE_NAME` and the optional
/// `PACKAGE_VERSION` / `PACKAGE_LOCAL_PATH`.
fn package_from_env() -> Result<Package> {
    let ecosystem: Ecosystem = env::var("PACKAGE_ECOSYSTEM")
        .context("PACKAGE_ECOSYSTEM must be set")?
        .parse()
        .context("Invalid PACKAGE_ECOSYSTEM")?;
    let name = env::var("PACKAGE_NAME").context("PACKAGE_NAME must be set")?;
    if name.trim().is_empty() {
        anyhow::bail!("PACKAGE_NAME cannot be empty");
    }

    let mut package = Package::new(ecosystem, name.trim());
    if let Ok(version) = env::var("PACKAGE_VERSION") {
        if !version.trim().is_empty() {
            package = package.with_version(version.trim());
        }
    }
    if let Ok(path) = env::var("PACKAGE_LOCAL_PATH") {
        if !path.trim().is_empty() {
            package = package.with_local_path(path.trim());
        }
    }
    Ok(package)
}

fn print_results(results: &PhaseResults) -> Result<()> {
    let json = serde_json::to_string_pretty(results).context("Failed to serialize results")?;
    println!("{}", json);
    Ok(())
}

async fn run() -> Result<bool> {
    let config = Config::from_env().context("Failed to load configuration")?;
    config.validate().context("Invalid configuration")?;

    init_logging(config.logging.to_log_config(SERVICE_NAME)?)
        .context("Failed to initialize logging")?;

    let package = package_from_env()?;
    let image = config
        .sandbox
        .image
        .clone()
        .unwrap_or_else(|| package.ecosystem.sandbox_image().to_string());

    info!(package = %package, %image, interface = %config.capture.interface, capture = config.capture.enabled, "Dynamic analysis starting");

    let sandbox = Container::new(config.sandbox.clone(), image);
    let mut engine = AnalysisEngine::new(sandbox, DynamicAnalyzer::from_config(&config));

    match engine.run(&package).await {
        Ok(results) => {
            print_results(&results)?;
            Ok(true)
        }
        Err(incomplete) => {
            error!(phase = ?incomplete.phase, "{}", incomplete);
            print_results(&incomplete.partial)?;
            Ok(false)
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    match run().await {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(e) => {
            eprintln!("dynamic-analysis: {:#}", e);
            ExitCode::FAILURE
        }
    }
}
