//! Command-line argument parsing

use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;

use crate::config::Config;

/// Upload files to an HTTP endpoint
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Configuration file (default: ~/.config/upqueue/config.toml)
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Upload endpoint (overrides the configured URL)
    #[arg(short, long)]
    pub url: Option<String>,

    /// Extra request header, as `Name: value` (repeatable)
    #[arg(short = 'H', long = "header")]
    pub headers: Vec<String>,

    /// Upload all files at once
    #[arg(long, conflicts_with = "sequential")]
    pub parallel: bool,

    /// Upload one file at a time
    #[arg(long)]
    pub sequential: bool,

    /// Check files against the configured filters before queueing
    #[arg(long, default_value = "false")]
    pub validate: bool,

    /// Files to upload
    #[arg(required = true)]
    pub files: Vec<PathBuf>,
}

impl Args {
    /// Applies command-line overrides on top of the loaded configuration.
    pub fn apply(&self, config: &mut Config) -> anyhow::Result<()> {
        if let Some(url) = &self.url {
            config.upload.url = url.clone();
        }
        for header in &self.headers {
            let (name, value) = header
                .split_once(':')
                .with_context(|| format!("header must look like `Name: value`: {header}"))?;
            config
                .upload
                .headers
                .insert(name.trim().to_string(), value.trim().to_string());
        }
        if self.parallel {
            config.queue.parallel = true;
        }
        if self.sequential {
            config.queue.parallel = false;
        }
        Ok(())
    }
}
