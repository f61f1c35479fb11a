//! idp-gate - operator CLI for the identity-provider gate
//!
//! Builds the configured provider and drives its operations by hand: useful
//! for checking a deployment's OAuth settings before wiring them into the
//! certificate issuer.

use std::env;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context as _, Result, bail};
use clap::Parser;
use tracing::{error, info};

use idp_gate::{
    Context, Provider, ProviderRegistry, Token,
    cli::{Cli, Command},
    config::Config,
    flow::LoginFlow,
    metrics::{AuthMetrics, RecorderMetrics},
    setup_tracing,
};

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let config = match Config::load(cli.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Failed to load configuration: {e}");
            return ExitCode::FAILURE;
        }
    };

    let level = cli.log_level.as_deref().unwrap_or(&config.log.level);
    let format = cli.log_format.as_deref().or(config.log.format.as_deref());
    if let Err(e) = setup_tracing(level, format) {
        eprintln!("Failed to setup tracing: {e}");
        return ExitCode::FAILURE;
    }

    #[cfg(feature = "metrics")]
    let prometheus = if cli.print_metrics {
        match idp_gate::metrics::install_prometheus_recorder() {
            Ok(handle) => Some(handle),
            Err(e) => {
                error!("{e}");
                return ExitCode::FAILURE;
            }
        }
    } else {
        None
    };

    let code = match run(&cli, &config).await {
        Ok(code) => code,
        Err(e) => {
            error!("{e:#}");
            ExitCode::FAILURE
        }
    };

    #[cfg(feature = "metrics")]
    if let Some(handle) = prometheus {
        print!("{}", handle.render());
    }

    code
}

async fn run(cli: &Cli, config: &Config) -> Result<ExitCode> {
    let registry = ProviderRegistry::with_builtin();

    if let Command::Providers = cli.command {
        for name in registry.names() {
            println!("{name}");
        }
        return Ok(ExitCode::SUCCESS);
    }

    let metrics: Arc<dyn AuthMetrics> = Arc::new(RecorderMetrics);
    let provider = registry
        .new_provider(&config.auth, metrics)
        .context("Failed to build identity provider")?;
    let ctx = Context::with_timeout(Duration::from_secs(cli.timeout));

    match &cli.command {
        Command::Check | Command::Providers => {
            println!("provider: {}", provider.name());
            println!("callback: {}", config.auth.oauth_callback_url);
            println!("whitelist: {} entries", config.auth.users_whitelist.len());
            Ok(ExitCode::SUCCESS)
        }
        Command::AuthUrl => {
            let (pending, url) = LoginFlow::start(provider.as_ref());
            println!("state: {}", pending.state());
            println!("{url}");
            Ok(ExitCode::SUCCESS)
        }
        Command::Login { code } => {
            let token = provider.exchange(&ctx, code).await?;
            Ok(report(provider.as_ref(), &ctx, &token).await)
        }
        Command::Verify { token_env } => {
            let token = token_from_env(token_env)?;
            Ok(report(provider.as_ref(), &ctx, &token).await)
        }
        Command::Revoke { token_env } => {
            let token = token_from_env(token_env)?;
            provider.revoke(&ctx, &token).await?;
            info!(provider = provider.name(), "Token revoked");
            println!("revoked");
            Ok(ExitCode::SUCCESS)
        }
    }
}

/// Print the authorization decision and identity; exit status mirrors it.
async fn report(provider: &dyn Provider, ctx: &Context, token: &Token) -> ExitCode {
    let valid = provider.valid(ctx, token).await;
    println!("valid: {valid}");
    if !valid {
        return ExitCode::FAILURE;
    }
    println!("email: {}", provider.email(ctx, token).await);
    println!("username: {}", provider.username(ctx, token).await);
    ExitCode::SUCCESS
}

fn token_from_env(var: &str) -> Result<Token> {
    let value = env::var(var).with_context(|| format!("{var} is not set"))?;
    let value = value.trim();
    if value.is_empty() {
        bail!("{var} is empty");
    }
    Ok(Token::bearer(value))
}
