//! Command line for the `voxgate` binary.

use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand};

use vx_domain::config::{Config, ConfigSeverity};

#[derive(Parser)]
#[command(name = "voxgate", about = "Real-time voice+vision conversation server")]
pub struct Cli {
    /// Path to the TOML configuration file.
    #[arg(short, long, global = true, default_value = "voxgate.toml")]
    pub config: PathBuf,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand)]
pub enum Command {
    /// Run the server (the default).
    Serve,
    /// Configuration helpers.
    #[command(subcommand)]
    Config(ConfigCommand),
    /// Print the version.
    Version,
}

#[derive(Subcommand)]
pub enum ConfigCommand {
    /// Check the configuration and exit non-zero on errors.
    Validate,
    /// Print the effective configuration.
    Show,
}

/// Load the config file; a missing file yields defaults (validation will
/// flag the absent provider endpoints).
pub fn load_config(path: &Path) -> anyhow::Result<Config> {
    if !path.exists() {
        tracing::warn!(path = %path.display(), "config file not found, using defaults");
        return Ok(Config::default());
    }
    let raw = std::fs::read_to_string(path)?;
    let config: Config = toml::from_str(&raw)
        .map_err(|e| anyhow::anyhow!("{}: {e}", path.display()))?;
    Ok(config)
}

/// Print every issue; returns false when any is an error.
pub fn validate(config: &Config) -> bool {
    let issues = config.validate();
    for issue in &issues {
        match issue.severity {
            ConfigSeverity::Warning => eprintln!("warning: {issue}"),
            ConfigSeverity::Error => eprintln!("error: {issue}"),
        }
    }
    let ok = !issues.iter().any(|i| i.severity == ConfigSeverity::Error);
    if ok {
        println!("configuration OK ({} warning(s))", issues.len());
    }
    ok
}

pub fn show(config: &Config) {
    match toml::to_string_pretty(config) {
        Ok(rendered) => println!("{rendered}"),
        Err(e) => eprintln!("error: failed to render config: {e}"),
    }
}
