//! Core domain + application logic for the helpdesk ticket bot.
//!
//! This crate is framework-agnostic. The hosting platform (Discord today) lives
//! behind the [`ports::ChatPlatform`] trait implemented in adapter crates.

pub mod access;
pub mod audit;
pub mod close;
pub mod commands;
pub mod config;
pub mod domain;
pub mod errors;
pub mod intake;
pub mod kinds;
pub mod locks;
pub mod logging;
pub mod monitor;
pub mod persist;
pub mod ports;
pub mod provisioner;
pub mod registry;
pub mod retry;
pub mod service;
pub mod settings;
pub mod transcript;

#[cfg(test)]
pub(crate) mod testing;

pub use errors::{Error, Result};
