// src/cli.rs
use clap::{Parser, Subcommand};
use std::path::PathBuf;

use crate::config::DEFAULT_CONFIG_FILE;

#[derive(Debug, Parser)]
#[command(name = "sdslb")]
#[command(about = "Score-based HTTP/WebSocket load balancer", long_about = None)]
pub struct Cli {
    /// Log what the balancer is doing
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Configuration file (YAML or JSON)
    #[arg(short = 'f', long = "filename", global = true, default_value = DEFAULT_CONFIG_FILE)]
    pub filename: PathBuf,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Query a running balancer for worker and backend status
    Status,
}

impl Cli {
    pub fn log_filter(&self) -> &'static str {
        if self.verbose {
            "sds_load_balancer=debug,sdslb=debug,hyper=info"
        } else {
            "warn"
        }
    }
}
