use mcvm::cloud::{CloudApi, PhalaCloud, DEFAULT_API_URL};
use mcvm::config::{API_KEY_ENV, API_URL_ENV};

use anyhow::Context;
use anyhow::Result;
use clap::Parser;

#[derive(Parser)]
#[clap(author, version, about, long_about = None)]
/// List nodes, images and KMS entries available to the account
struct Cli {
    /// Cloud API url
    #[clap(long, value_parser, env = API_URL_ENV, default_value = DEFAULT_API_URL)]
    api_url: String,
}

#[tokio::main]
pub async fn main() -> Result<()> {
    let cli = Cli::parse();

    let cloud = PhalaCloud::new(cli.api_url, std::env::var(API_KEY_ENV).ok())?;

    let nodes = cloud.list_nodes().await.context("failed to list nodes")?;
    for node in nodes.nodes {
        let images: Vec<&str> = node.images.iter().map(|i| i.name.as_str()).collect();
        println!(
            "node {} (teepod {}, device {}): {}",
            node.name,
            node.teepod_id,
            node.device_id.as_deref().unwrap_or("-"),
            images.join(", ")
        );
    }

    let kms = cloud.list_kms().await.context("failed to list KMS")?;
    for item in kms.items {
        println!(
            "kms {} (slug {}, chain {}): {}",
            item.id,
            item.slug.as_deref().unwrap_or("-"),
            item.chain_id.map(|c| c.to_string()).unwrap_or("-".into()),
            item.kms_contract_address.as_deref().unwrap_or("-")
        );
    }

    Ok(())
}
