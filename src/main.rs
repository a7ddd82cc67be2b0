use std::fs;
use std::process::ExitCode;

use anyhow::Context;
use anyhow::Result;
use clap::error::ErrorKind;
use clap::Parser;
use tracing::Instrument;
use tracing::{error, info, info_span};
use tracing_subscriber::EnvFilter;

use mcvm::batch;
use mcvm::chain::KmsContractDeployer;
use mcvm::cloud::PhalaCloud;
use mcvm::config::{Cli, Settings};

async fn run(settings: Settings) -> Result<()> {
    info!(?settings.compose_path);
    info!(?settings.batch.name);
    info!(?settings.batch.count);
    info!(?settings.batch.node_name);
    info!(?settings.batch.node_id);
    info!(?settings.batch.kms_id);
    info!(?settings.rpc_url);
    info!(?settings.api_url);

    let compose = fs::read_to_string(&settings.compose_path)
        .context("failed to read docker compose file")?;

    let deployer = KmsContractDeployer::new(
        &settings.private_key,
        settings.rpc_url.clone(),
        settings.allow_any_device,
        settings.disable_upgrades,
    )
    .context("failed to set up contract deployer")?;
    info!(deployer = %deployer.address());

    let cloud = PhalaCloud::new(settings.api_url.clone(), settings.api_key.clone())
        .context("failed to set up cloud client")?;

    let report = batch::run(&cloud, &deployer, &settings.batch, &compose)
        .instrument(info_span!("batch"))
        .await?;

    println!("app id: {}", report.deployment.app_id_hex());
    println!("contract address: {}", report.deployment.app_auth_address);
    println!("deployer: {}", report.deployment.deployer);
    for (index, instance) in report.instances.iter().enumerate() {
        println!(
            "instance {index}: compose hash {} status {}",
            instance.compose_hash,
            instance.receipt.status.as_deref().unwrap_or("unknown")
        );
    }

    Ok(())
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let mut filter = EnvFilter::new("info");
    if let Ok(var) = std::env::var("RUST_LOG") {
        filter = filter.add_directive(var.parse()?);
    }
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .with_env_filter(filter)
        .init();

    // usage errors go to stdout without a trace, before any network call
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) => {
            println!("{e}");
            return Ok(match e.kind() {
                ErrorKind::DisplayHelp | ErrorKind::DisplayVersion => ExitCode::SUCCESS,
                _ => ExitCode::FAILURE,
            });
        }
    };
    let settings = match cli.validate(|key| std::env::var(key).ok()) {
        Ok(settings) => settings,
        Err(e) => {
            println!("{e}");
            return Ok(ExitCode::FAILURE);
        }
    };

    match run(settings).await {
        Ok(()) => Ok(ExitCode::SUCCESS),
        Err(e) => {
            error!(?e, "run error");
            Ok(ExitCode::FAILURE)
        }
    }
}
