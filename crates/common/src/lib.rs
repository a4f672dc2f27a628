//! # Dongate Common
//!
//! Komponen bersama untuk crate gateway:
//!
//! - [`config`]: loader TOML dan default untuk semua section
//! - [`validation`]: validator identitas workflow (trigger dan metadata)
//! - [`auth`]: verifikasi token ETH-signed yang mengikat request ke signer

pub mod auth;
pub mod config;
pub mod validation;

pub use auth::{AuthError, EthJwtAuthenticator, RequestAuthenticator, VerifiedToken};
pub use config::{ConfigError, GatewayConfig, ServiceConfig};
pub use validation::ValidationError;
