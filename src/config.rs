use std::path::PathBuf;

use clap::Parser;
use thiserror::Error;

use crate::batch::BatchParams;
use crate::cloud::DEFAULT_API_URL;

pub const PRIVATE_KEY_ENV: &str = "PRIVATEKEY";
pub const RPC_URL_ENV: &str = "RPC_URL";
pub const API_KEY_ENV: &str = "PHALA_CLOUD_API_KEY";
pub const API_URL_ENV: &str = "PHALA_CLOUD_API_PREFIX";

#[derive(Parser, Debug)]
#[clap(author, version, about, long_about = None)]
/// Provision several CVMs that share one app identity and one app auth contract
pub struct Cli {
    /// Docker compose file
    #[clap(value_parser)]
    pub compose: Option<PathBuf>,

    /// App name
    #[clap(long, value_parser, default_value = "multi-app")]
    pub name: String,

    /// vCPUs per instance
    #[clap(long, value_parser, default_value_t = 1)]
    pub vcpu: u32,

    /// Memory per instance in MB
    #[clap(long, value_parser, default_value_t = 1024)]
    pub memory: u32,

    /// Disk size per instance in GB
    #[clap(long, value_parser, default_value_t = 10)]
    pub disk_size: u32,

    /// Deployer private key, falls back to PRIVATEKEY
    #[clap(long, value_parser)]
    pub private_key: Option<String>,

    /// RPC url of the KMS chain, falls back to RPC_URL
    #[clap(long, value_parser)]
    pub rpc_url: Option<String>,

    /// KMS id or slug
    #[clap(long, value_parser)]
    pub kms_id: Option<String>,

    /// Number of instances
    #[clap(long, value_parser, default_value_t = 2)]
    pub count: u32,

    /// Node id, informational only
    #[clap(long, value_parser)]
    pub node_id: Option<u64>,

    /// Name of the node to deploy on
    #[clap(long, value_parser, default_value = "prod7")]
    pub node_name: String,

    /// Cloud API url, falls back to PHALA_CLOUD_API_PREFIX
    #[clap(long, value_parser)]
    pub api_url: Option<String>,

    /// Let any device run the app
    #[clap(long)]
    pub allow_any_device: bool,

    /// Deploy the app auth contract without upgrade support
    #[clap(long)]
    pub disable_upgrades: bool,
}

#[derive(Error, Debug, PartialEq)]
pub enum UsageError {
    #[error("Usage: multi-cvm <docker-compose.yml> --kms-id <id> [--private-key <key>] [--rpc-url <url>] [--count <n>]")]
    MissingCompose,

    #[error("Docker compose file not found: {0}")]
    ComposeNotFound(PathBuf),

    #[error("Private key is required, pass --private-key or set PRIVATEKEY")]
    MissingPrivateKey,

    #[error("RPC URL is required, pass --rpc-url or set RPC_URL")]
    MissingRpcUrl,

    #[error("KMS id is required, pass --kms-id")]
    MissingKmsId,

    #[error("--count must be at least 1")]
    ZeroCount,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Settings {
    pub compose_path: PathBuf,
    pub private_key: String,
    pub rpc_url: String,
    pub api_url: String,
    pub api_key: Option<String>,
    pub allow_any_device: bool,
    pub disable_upgrades: bool,
    pub batch: BatchParams,
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

impl Cli {
    /// Checks required inputs in order, taking env fallbacks from `env`.
    /// Touches nothing but the local filesystem.
    pub fn validate(self, env: impl Fn(&str) -> Option<String>) -> Result<Settings, UsageError> {
        let compose_path = self.compose.ok_or(UsageError::MissingCompose)?;
        if !compose_path.is_file() {
            return Err(UsageError::ComposeNotFound(compose_path));
        }

        let private_key = non_empty(self.private_key)
            .or_else(|| non_empty(env(PRIVATE_KEY_ENV)))
            .ok_or(UsageError::MissingPrivateKey)?;
        let rpc_url = non_empty(self.rpc_url)
            .or_else(|| non_empty(env(RPC_URL_ENV)))
            .ok_or(UsageError::MissingRpcUrl)?;
        let kms_id = non_empty(self.kms_id).ok_or(UsageError::MissingKmsId)?;
        if self.count == 0 {
            return Err(UsageError::ZeroCount);
        }

        let api_url = non_empty(self.api_url)
            .or_else(|| non_empty(env(API_URL_ENV)))
            .unwrap_or_else(|| DEFAULT_API_URL.to_owned());

        Ok(Settings {
            compose_path,
            private_key,
            rpc_url,
            api_url,
            api_key: non_empty(env(API_KEY_ENV)),
            allow_any_device: self.allow_any_device,
            disable_upgrades: self.disable_upgrades,
            batch: BatchParams {
                name: self.name,
                vcpu: self.vcpu,
                memory: self.memory,
                disk_size: self.disk_size,
                node_name: self.node_name,
                node_id: self.node_id,
                kms_id,
                count: self.count,
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    const COMPOSE: &str = concat!(env!("CARGO_MANIFEST_DIR"), "/Cargo.toml");

    fn no_env(_: &str) -> Option<String> {
        None
    }

    fn parse(args: &[&str]) -> Cli {
        Cli::try_parse_from(std::iter::once("multi-cvm").chain(args.iter().copied())).unwrap()
    }

    #[test]
    fn test_defaults() {
        let settings = parse(&[
            COMPOSE,
            "--private-key",
            "0xabc",
            "--rpc-url",
            "http://localhost:8545",
            "--kms-id",
            "kms1",
        ])
        .validate(no_env)
        .unwrap();

        assert_eq!(
            settings.batch,
            BatchParams {
                name: "multi-app".into(),
                vcpu: 1,
                memory: 1024,
                disk_size: 10,
                node_name: "prod7".into(),
                node_id: None,
                kms_id: "kms1".into(),
                count: 2,
            }
        );
        assert_eq!(settings.private_key, "0xabc");
        assert_eq!(settings.api_url, DEFAULT_API_URL);
        assert_eq!(settings.api_key, None);
        assert!(!settings.allow_any_device);
        assert!(!settings.disable_upgrades);
    }

    #[test]
    fn test_flags_override_defaults() {
        let settings = parse(&[
            COMPOSE,
            "--name",
            "my-app",
            "--vcpu",
            "4",
            "--memory",
            "8192",
            "--disk-size",
            "40",
            "--count",
            "5",
            "--node-id",
            "12",
            "--node-name",
            "prod9",
            "--private-key",
            "0xabc",
            "--rpc-url",
            "http://localhost:8545",
            "--kms-id",
            "kms1",
            "--allow-any-device",
        ])
        .validate(no_env)
        .unwrap();

        assert_eq!(settings.batch.name, "my-app");
        assert_eq!(settings.batch.vcpu, 4);
        assert_eq!(settings.batch.memory, 8192);
        assert_eq!(settings.batch.disk_size, 40);
        assert_eq!(settings.batch.count, 5);
        assert_eq!(settings.batch.node_id, Some(12));
        assert_eq!(settings.batch.node_name, "prod9");
        assert!(settings.allow_any_device);
    }

    #[test]
    fn test_env_fallbacks() {
        let env: HashMap<&str, &str> = HashMap::from([
            (PRIVATE_KEY_ENV, "0xdef"),
            (RPC_URL_ENV, "http://rpc.example"),
            (API_KEY_ENV, "phak_secret"),
            (API_URL_ENV, "http://cloud.example/api/v1"),
        ]);

        let settings = parse(&[COMPOSE, "--kms-id", "kms1"])
            .validate(|key| env.get(key).map(|v| v.to_string()))
            .unwrap();

        assert_eq!(settings.private_key, "0xdef");
        assert_eq!(settings.rpc_url, "http://rpc.example");
        assert_eq!(settings.api_key.as_deref(), Some("phak_secret"));
        assert_eq!(settings.api_url, "http://cloud.example/api/v1");
    }

    #[test]
    fn test_flag_wins_over_env() {
        let settings = parse(&[
            COMPOSE,
            "--private-key",
            "0xabc",
            "--rpc-url",
            "http://localhost:8545",
            "--kms-id",
            "kms1",
        ])
        .validate(|_| Some("from-env".into()))
        .unwrap();

        assert_eq!(settings.private_key, "0xabc");
        assert_eq!(settings.rpc_url, "http://localhost:8545");
    }

    #[test]
    fn test_missing_compose() {
        let err = parse(&["--kms-id", "kms1"]).validate(no_env).unwrap_err();

        assert_eq!(err, UsageError::MissingCompose);
    }

    #[test]
    fn test_compose_not_found() {
        let err = parse(&["/nonexistent/docker-compose.yml", "--kms-id", "kms1"])
            .validate(no_env)
            .unwrap_err();

        assert_eq!(
            err,
            UsageError::ComposeNotFound("/nonexistent/docker-compose.yml".into())
        );
    }

    #[test]
    fn test_missing_private_key() {
        let err = parse(&[COMPOSE, "--rpc-url", "http://localhost:8545", "--kms-id", "kms1"])
            .validate(no_env)
            .unwrap_err();

        assert_eq!(err, UsageError::MissingPrivateKey);
    }

    #[test]
    fn test_missing_rpc_url() {
        let err = parse(&[COMPOSE, "--private-key", "0xabc", "--kms-id", "kms1"])
            .validate(no_env)
            .unwrap_err();

        assert_eq!(err, UsageError::MissingRpcUrl);
    }

    #[test]
    fn test_missing_kms_id() {
        let err = parse(&[
            COMPOSE,
            "--private-key",
            "0xabc",
            "--rpc-url",
            "http://localhost:8545",
        ])
        .validate(no_env)
        .unwrap_err();

        assert_eq!(err, UsageError::MissingKmsId);
    }

    #[test]
    fn test_zero_count() {
        let err = parse(&[
            COMPOSE,
            "--private-key",
            "0xabc",
            "--rpc-url",
            "http://localhost:8545",
            "--kms-id",
            "kms1",
            "--count",
            "0",
        ])
        .validate(no_env)
        .unwrap_err();

        assert_eq!(err, UsageError::ZeroCount);
    }
}
