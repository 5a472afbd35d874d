pub mod commands;
pub mod config;
pub mod core;
pub mod db;
pub mod error;
pub mod id;
pub mod types;

#[cfg(test)]
pub mod testutil;
