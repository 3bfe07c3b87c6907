//! Launch entrypoint of the remote extension host agent.
//!
//! The process either runs a single extension management command and exits, or starts the agent
//! server and keeps running until it is told to stop.

pub mod cli;
pub mod command;
pub mod config;
pub mod exit;
pub mod fault;
pub mod launch;
pub mod logging;
pub mod panic;
pub mod provision;
pub mod server;
