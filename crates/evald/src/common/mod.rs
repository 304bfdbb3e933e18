pub mod cli;
pub mod error;
pub mod setup;
#[cfg(test)]
pub mod wrapped;
