use thiserror::Error;

#[derive(Error, Debug, PartialEq)]
pub enum Error {
    #[error("node {0} not found")]
    NodeNotFound(String),

    #[error("node {0} has no available images")]
    NoImage(String),

    #[error("node {0} has no device id")]
    NodeWithoutDevice(String),

    #[error("KMS {0} not found")]
    KmsNotFound(String),

    #[error("KMS {0} has no contract address")]
    KmsWithoutContract(String),

    #[error("API error: {status_code} - {message}")]
    Api { status_code: u16, message: String },
}
