//! Provision and run isolated, versioned Odoo instances on one host.
//!
//! A full setup goes database engine → Odoo runtime → instance, see
//! [`pipeline::InstallPipeline`]. Everything lives under one data directory
//! described by [`paths::Paths`].

pub mod archive;
pub mod command;
pub mod config;
pub mod database;
pub mod download;
mod error;
pub mod instance;
pub mod paths;
pub mod pipeline;
pub mod port;
pub mod process;
pub mod progress;
pub mod registry;
pub mod runtime;
pub mod upstream;
pub mod validation;

pub use error::{AppError, ErrorKind, Result};
