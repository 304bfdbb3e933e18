#![deny(clippy::await_holding_refcell_ref)]

pub mod commands;
pub mod common;
pub mod fleet;
pub mod runner;
pub mod scheduler;
pub mod store;

#[cfg(test)]
pub(crate) mod tests;

pub type Error = crate::common::error::EvaldError;
pub type Result<T> = std::result::Result<T, Error>;

pub const EVALD_VERSION: &str = env!("CARGO_PKG_VERSION");
