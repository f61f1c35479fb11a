//! Command-line interface

use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// Identity-provider gate for short-lived certificate issuance
#[derive(Parser, Debug)]
#[command(name = "idp-gate")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Path to configuration file (YAML)
    #[arg(short, long, env = "IDP_GATE_CONFIG", global = true)]
    pub config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error); overrides `log.level`
    #[arg(long, env = "IDP_GATE_LOG_LEVEL", global = true)]
    pub log_level: Option<String>,

    /// Log format (text, json); overrides `log.format`
    #[arg(long, env = "IDP_GATE_LOG_FORMAT", global = true)]
    pub log_format: Option<String>,

    /// Per-command deadline in seconds
    #[arg(long, default_value_t = 30, global = true)]
    pub timeout: u64,

    /// Print Prometheus metrics after the command
    #[cfg(feature = "metrics")]
    #[arg(long, global = true)]
    pub print_metrics: bool,

    /// Subcommand
    #[command(subcommand)]
    pub command: Command,
}

/// Available subcommands
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Load configuration and build the provider without contacting it
    Check,

    /// Mint an anti-forgery state and print the authorization URL
    AuthUrl,

    /// Exchange an authorization code and report the resulting identity
    Login {
        /// Authorization code from the callback
        #[arg(long, env = "IDP_GATE_CODE", hide_env_values = true)]
        code: String,
    },

    /// Check whether an access token belongs to an authorized principal
    Verify {
        /// Environment variable holding the access token
        #[arg(long, default_value = "IDP_GATE_TOKEN")]
        token_env: String,
    },

    /// Revoke an access token at the backend
    Revoke {
        /// Environment variable holding the access token
        #[arg(long, default_value = "IDP_GATE_TOKEN")]
        token_env: String,
    },

    /// List the built-in providers
    Providers,
}
