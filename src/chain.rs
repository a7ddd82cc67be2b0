use std::str::FromStr;

use alloy::network::EthereumWallet;
use alloy::primitives::{Address, B256};
use alloy::providers::{Provider, ProviderBuilder};
use alloy::rpc::types::TransactionReceipt;
use alloy::signers::local::PrivateKeySigner;
use alloy::sol;
use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use tracing::info;

sol! {
    #[allow(missing_docs)]
    #[sol(rpc)]
    interface DstackKms {
        event AppDeployedViaFactory(address indexed appId, address indexed proxyAddress, address indexed deployer);

        function deployAndRegisterApp(
            address deployer,
            bool disableUpgrades,
            bool allowAnyDevice,
            bytes32 initialDeviceId,
            bytes32 initialComposeHash
        ) external returns (address appId, address proxyAddress);
    }
}

/// What the authorization contract gets bound to
#[derive(Debug, Clone, PartialEq)]
pub struct AppAuthTarget {
    pub chain_id: Option<u64>,
    pub kms_contract_address: String,
    pub device_id: String,
    pub compose_hash: String,
}

/// App identity established on chain, shared by every instance of a batch
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Deployment {
    pub app_id: Address,
    pub app_auth_address: Address,
    pub deployer: Address,
}

impl Deployment {
    /// App id in the form the cloud API expects: lowercase hex, no prefix
    pub fn app_id_hex(&self) -> String {
        hex::encode(self.app_id.as_slice())
    }
}

#[async_trait]
pub trait AppAuthDeployer {
    async fn deploy(&self, target: &AppAuthTarget) -> Result<Deployment>;
}

#[async_trait]
impl<'a, T> AppAuthDeployer for &'a T
where
    T: AppAuthDeployer + Send + Sync,
{
    async fn deploy(&self, target: &AppAuthTarget) -> Result<Deployment> {
        (**self).deploy(target).await
    }
}

/// Deploys app auth contracts through the KMS factory
pub struct KmsContractDeployer {
    signer: PrivateKeySigner,
    rpc_url: String,
    allow_any_device: bool,
    disable_upgrades: bool,
}

impl KmsContractDeployer {
    pub fn new(
        private_key: &str,
        rpc_url: String,
        allow_any_device: bool,
        disable_upgrades: bool,
    ) -> Result<KmsContractDeployer> {
        let signer = PrivateKeySigner::from_str(private_key.trim())
            .context("failed to parse private key")?;

        Ok(KmsContractDeployer {
            signer,
            rpc_url,
            allow_any_device,
            disable_upgrades,
        })
    }

    pub fn address(&self) -> Address {
        self.signer.address()
    }
}

pub fn parse_bytes32(value: &str) -> Result<B256> {
    B256::from_str(value.trim()).with_context(|| format!("invalid bytes32 value: {value}"))
}

#[async_trait]
impl AppAuthDeployer for KmsContractDeployer {
    async fn deploy(&self, target: &AppAuthTarget) -> Result<Deployment> {
        let kms_address = target
            .kms_contract_address
            .parse::<Address>()
            .context("failed to parse KMS contract address")?;
        let device_id = parse_bytes32(&target.device_id).context("failed to parse device id")?;
        let compose_hash =
            parse_bytes32(&target.compose_hash).context("failed to parse compose hash")?;

        let deployer = self.address();
        let wallet = EthereumWallet::from(self.signer.clone());
        let provider = ProviderBuilder::new()
            .with_recommended_fillers()
            .wallet(wallet)
            .on_http(self.rpc_url.parse().context("failed to parse RPC URL")?);

        let rpc_chain_id = provider
            .get_chain_id()
            .await
            .context("failed to fetch chain id")?;
        check_chain_id(target.chain_id, rpc_chain_id)?;
        info!(rpc_chain_id, ?kms_address, ?deployer, "deploying app auth contract");

        let kms = DstackKms::new(kms_address, provider);
        let receipt = kms
            .deployAndRegisterApp(
                deployer,
                self.disable_upgrades,
                self.allow_any_device,
                device_id,
                compose_hash,
            )
            .send()
            .await
            .context("failed to send deployment transaction")?
            .get_receipt()
            .await
            .context("failed to fetch deployment receipt")?;

        deployment_from_receipt(&receipt)
    }
}

fn check_chain_id(expected: Option<u64>, rpc_chain_id: u64) -> Result<()> {
    match expected {
        Some(chain_id) if chain_id != rpc_chain_id => Err(anyhow!(
            "RPC chain id {rpc_chain_id} does not match KMS chain id {chain_id}"
        )),
        _ => Ok(()),
    }
}

fn deployment_from_receipt(receipt: &TransactionReceipt) -> Result<Deployment> {
    if !receipt.status() {
        return Err(anyhow!(
            "deployment transaction {} reverted",
            receipt.transaction_hash
        ));
    }

    let event = receipt
        .inner
        .logs()
        .iter()
        .find_map(|log| log.log_decode::<DstackKms::AppDeployedViaFactory>().ok())
        .ok_or(anyhow!("AppDeployedViaFactory event not found in receipt"))?;
    let event = event.inner.data;

    info!(
        tx = ?receipt.transaction_hash,
        app_id = ?event.appId,
        proxy = ?event.proxyAddress,
        "app auth contract deployed"
    );

    Ok(Deployment {
        app_id: event.appId,
        app_auth_address: event.proxyAddress,
        deployer: event.deployer,
    })
}
