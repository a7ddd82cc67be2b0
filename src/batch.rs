use anyhow::{Context, Result};
use tracing::{info, info_span, warn, Instrument};

use crate::chain::{AppAuthDeployer, AppAuthTarget, Deployment};
use crate::cloud::{
    AppCompose, CloudApi, CommitRequest, ComposeFile, CvmReceipt, Image, KmsInfo, Node,
};
use crate::error::Error;

// Basic architecture:
// Look up node and KMS once, build one request
// First instance establishes the app identity on chain
// Every later instance reuses it, strictly one after another

#[derive(Debug, Clone, PartialEq)]
pub struct BatchParams {
    pub name: String,
    pub vcpu: u32,
    pub memory: u32,
    pub disk_size: u32,
    pub node_name: String,
    // informational only, selection goes by node name
    pub node_id: Option<u64>,
    pub kms_id: String,
    pub count: u32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Instance {
    pub compose_hash: String,
    pub receipt: CvmReceipt,
}

#[derive(Debug, Clone, PartialEq)]
pub struct BatchReport {
    pub deployment: Deployment,
    pub instances: Vec<Instance>,
}

pub fn select_node<'a>(nodes: &'a [Node], name: &str) -> Result<&'a Node, Error> {
    nodes
        .iter()
        .find(|node| node.name == name)
        .ok_or_else(|| Error::NodeNotFound(name.to_owned()))
}

pub fn select_image(node: &Node) -> Result<&Image, Error> {
    node.images
        .first()
        .ok_or_else(|| Error::NoImage(node.name.clone()))
}

pub fn select_kms<'a>(items: &'a [KmsInfo], id: &str) -> Result<&'a KmsInfo, Error> {
    items
        .iter()
        .find(|kms| kms.slug.as_deref() == Some(id) || kms.id == id)
        .ok_or_else(|| Error::KmsNotFound(id.to_owned()))
}

pub fn build_request(
    params: &BatchParams,
    compose: &str,
    node: &Node,
    image: &Image,
    kms: &KmsInfo,
) -> AppCompose {
    AppCompose {
        name: params.name.clone(),
        compose_file: ComposeFile {
            docker_compose_file: compose.to_owned(),
        },
        vcpu: params.vcpu,
        memory: params.memory,
        disk_size: params.disk_size,
        node_id: node.teepod_id,
        image: image.name.clone(),
        kms_id: kms.slug.clone(),
    }
}

fn commit_request(deployment: &Deployment, compose_hash: &str, kms: &KmsInfo) -> CommitRequest {
    CommitRequest {
        app_id: deployment.app_id_hex(),
        compose_hash: compose_hash.to_owned(),
        kms_id: kms.id.clone(),
        contract_address: deployment.app_auth_address.to_string(),
        deployer_address: deployment.deployer.to_string(),
    }
}

async fn commit(
    cloud: &(impl CloudApi + Sync),
    deployment: &Deployment,
    compose_hash: String,
    kms: &KmsInfo,
) -> Result<Instance> {
    let receipt = cloud
        .commit(&commit_request(deployment, &compose_hash, kms))
        .await
        .context("failed to commit CVM")?;
    info!(?receipt.id, ?receipt.status, "committed");

    Ok(Instance {
        compose_hash,
        receipt,
    })
}

async fn provision(cloud: &(impl CloudApi + Sync), request: &AppCompose) -> Result<String> {
    let provision = cloud
        .provision(request)
        .await
        .context("failed to provision CVM")?;
    info!(%provision.compose_hash, "provisioned");

    Ok(provision.compose_hash)
}

pub async fn run(
    cloud: impl CloudApi + Sync,
    deployer: impl AppAuthDeployer + Sync,
    params: &BatchParams,
    compose: &str,
) -> Result<BatchReport> {
    let nodes = cloud.list_nodes().await.context("failed to list nodes")?;
    let node = select_node(&nodes.nodes, &params.node_name)?;
    let image = select_image(node)?;
    let device_id = node
        .device_id
        .clone()
        .filter(|id| !id.trim().is_empty())
        .ok_or_else(|| Error::NodeWithoutDevice(node.name.clone()))?;
    info!(%node.name, node.teepod_id, %image.name, "selected node");
    if let Some(node_id) = params.node_id {
        if node_id != node.teepod_id {
            warn!(node_id, node.teepod_id, "--node-id ignored, selection is by node name");
        }
    }

    let kms_list = cloud.list_kms().await.context("failed to list KMS")?;
    let kms = select_kms(&kms_list.items, &params.kms_id)?;
    let kms_contract_address = kms
        .kms_contract_address
        .clone()
        .ok_or_else(|| Error::KmsWithoutContract(kms.id.clone()))?;
    info!(%kms.id, ?kms.slug, ?kms.chain_id, %kms_contract_address, "selected KMS");

    let request = build_request(params, compose, node, image, kms);

    let (deployment, first) = async {
        let compose_hash = provision(&cloud, &request).await?;

        let deployment = deployer
            .deploy(&AppAuthTarget {
                chain_id: kms.chain_id,
                kms_contract_address,
                device_id,
                compose_hash: compose_hash.clone(),
            })
            .await
            .context("failed to deploy app auth contract")?;
        info!(
            app_id = %deployment.app_id_hex(),
            contract = %deployment.app_auth_address,
            deployer = %deployment.deployer,
            "app identity established"
        );

        let instance = commit(&cloud, &deployment, compose_hash, kms).await?;
        Ok::<_, anyhow::Error>((deployment, instance))
    }
    .instrument(info_span!("instance", index = 0))
    .await?;

    let mut instances = vec![first];
    for index in 1..params.count {
        let instance = async {
            let compose_hash = provision(&cloud, &request).await?;
            commit(&cloud, &deployment, compose_hash, kms).await
        }
        .instrument(info_span!("instance", index))
        .await
        .with_context(|| format!("instance {index} of {} failed", params.count))?;

        instances.push(instance);
    }

    info!(count = instances.len(), "all instances committed");

    Ok(BatchReport {
        deployment,
        instances,
    })
}
