pub mod batch;
pub mod chain;
pub mod cloud;
pub mod config;
pub mod error;
