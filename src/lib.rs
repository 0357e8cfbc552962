#![doc = "cwp-backup: per-account backup and offsite upload for Control Web Panel accounts."]

//! Enumerates the panel's accounts over its REST API, runs the panel's
//! backup script for each one, zips the result and uploads it to S3 under
//! `<prefix>/<date>/<username>:<timestamp>.zip`, then frees the local disk.
//!
//! Main entrypoint: [`backup::run_backups`]. Collaborator seams live in
//! [`contract`].

pub mod archive;
pub mod backup;
pub mod cli;
pub mod config;
pub mod contract;
pub mod error;
pub mod load_config;
pub mod panel;
pub mod upload;

pub use cli::{run, Cli, Commands};
