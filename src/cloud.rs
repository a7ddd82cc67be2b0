use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::{Client, RequestBuilder};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::Error;

pub const DEFAULT_API_URL: &str = "https://cloud-api.phala.network/api/v1";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Image {
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    pub teepod_id: u64,
    pub name: String,
    #[serde(default)]
    pub device_id: Option<String>,
    #[serde(default)]
    pub images: Vec<Image>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeList {
    #[serde(default)]
    pub nodes: Vec<Node>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KmsInfo {
    pub id: String,
    #[serde(default)]
    pub slug: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub version: Option<String>,
    #[serde(default)]
    pub chain_id: Option<u64>,
    #[serde(default)]
    pub kms_contract_address: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KmsList {
    #[serde(default)]
    pub items: Vec<KmsInfo>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComposeFile {
    pub docker_compose_file: String,
}

/// Provisioning request, built once per batch and sent unchanged for every instance
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppCompose {
    pub name: String,
    pub compose_file: ComposeFile,
    pub vcpu: u32,
    pub memory: u32,
    pub disk_size: u32,
    pub node_id: u64,
    pub image: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub kms_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Provision {
    pub compose_hash: String,
    #[serde(default)]
    pub app_id: Option<String>,
    #[serde(default)]
    pub device_id: Option<String>,
    #[serde(default)]
    pub os_image_hash: Option<String>,
    #[serde(default)]
    pub app_env_encrypt_pubkey: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommitRequest {
    pub app_id: String,
    pub compose_hash: String,
    pub kms_id: String,
    pub contract_address: String,
    pub deployer_address: String,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct CvmReceipt {
    #[serde(default)]
    pub id: Option<serde_json::Value>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub app_id: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
}

#[async_trait]
pub trait CloudApi {
    async fn list_nodes(&self) -> Result<NodeList>;

    async fn list_kms(&self) -> Result<KmsList>;

    async fn provision(&self, request: &AppCompose) -> Result<Provision>;

    async fn commit(&self, request: &CommitRequest) -> Result<CvmReceipt>;
}

#[async_trait]
impl<'a, T> CloudApi for &'a T
where
    T: CloudApi + Send + Sync,
{
    async fn list_nodes(&self) -> Result<NodeList> {
        (**self).list_nodes().await
    }

    async fn list_kms(&self) -> Result<KmsList> {
        (**self).list_kms().await
    }

    async fn provision(&self, request: &AppCompose) -> Result<Provision> {
        (**self).provision(request).await
    }

    async fn commit(&self, request: &CommitRequest) -> Result<CvmReceipt> {
        (**self).commit(request).await
    }
}

/// Client for the Phala Cloud REST API
#[derive(Clone)]
pub struct PhalaCloud {
    client: Client,
    api_url: String,
    api_key: Option<String>,
}

impl PhalaCloud {
    pub fn new(api_url: String, api_key: Option<String>) -> Result<PhalaCloud> {
        let client = Client::builder()
            .build()
            .context("failed to build http client")?;

        Ok(PhalaCloud {
            client,
            api_url: api_url.trim_end_matches('/').to_owned(),
            api_key,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.api_url, path)
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.api_key {
            Some(key) => request.header("X-API-Key", key),
            None => request,
        }
    }

    async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        debug!(path, "GET");
        let request = self.authorize(self.client.get(self.url(path)));
        Self::parse(request, path).await
    }

    async fn post<B, T>(&self, path: &str, body: &B) -> Result<T>
    where
        B: Serialize + Sync,
        T: DeserializeOwned,
    {
        debug!(path, "POST");
        let request = self.authorize(self.client.post(self.url(path)).json(body));
        Self::parse(request, path).await
    }

    async fn parse<T: DeserializeOwned>(request: RequestBuilder, path: &str) -> Result<T> {
        let response = request
            .send()
            .await
            .with_context(|| format!("request to {path} failed"))?;

        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(Error::Api {
                status_code: status.as_u16(),
                message,
            }
            .into());
        }

        response
            .json::<T>()
            .await
            .with_context(|| format!("failed to parse response from {path}"))
    }
}

#[async_trait]
impl CloudApi for PhalaCloud {
    async fn list_nodes(&self) -> Result<NodeList> {
        self.get("/teepods/available").await
    }

    async fn list_kms(&self) -> Result<KmsList> {
        self.get("/kms").await
    }

    async fn provision(&self, request: &AppCompose) -> Result<Provision> {
        self.post("/cvms/provision", request).await
    }

    async fn commit(&self, request: &CommitRequest) -> Result<CvmReceipt> {
        self.post("/cvms", request).await
    }
}
