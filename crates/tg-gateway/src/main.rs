use std::sync::Arc;

use anyhow::Context;
use axum::http::Method;
use clap::Parser;
use sha2::{Digest, Sha256};
use tower_http::cors::CorsLayer;
use tracing_subscriber::EnvFilter;

use tg_classifier::Classifier;
use tg_domain::config::Config;
use tg_gateway::api;
use tg_gateway::cli::{Cli, Command, ConfigCommand};
use tg_gateway::state::AppState;
use tg_notifier::{LogNotifier, Notifier, WebhookNotifier};
use tg_policy::Evaluator;
use tg_smart_rule::SmartRuleEvaluator;
use tg_store::Store;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        None | Some(Command::Serve) => {
            init_tracing();
            let (config, _config_path) = tg_gateway::cli::load_config()?;
            run_server(Arc::new(config)).await
        }
        Some(Command::Doctor) => {
            let (config, config_path) = tg_gateway::cli::load_config()?;
            let passed = tg_gateway::cli::doctor::run(&config, &config_path).await?;
            if !passed {
                std::process::exit(1);
            }
            Ok(())
        }
        Some(Command::Config(ConfigCommand::Validate)) => {
            let (config, config_path) = tg_gateway::cli::load_config()?;
            let valid = tg_gateway::cli::config::validate(&config, &config_path);
            if !valid {
                std::process::exit(1);
            }
            Ok(())
        }
        Some(Command::Config(ConfigCommand::Show)) => {
            let (config, _config_path) = tg_gateway::cli::load_config()?;
            tg_gateway::cli::config::show(&config);
            Ok(())
        }
        Some(Command::Version) => {
            println!("toolguard {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
    }
}

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info,tg_gateway=debug")))
        .json()
        .init();
}

async fn run_server(config: Arc<Config>) -> anyhow::Result<()> {
    let issues = config.validate();
    for issue in &issues {
        match issue.severity {
            tg_domain::config::ConfigSeverity::Error => tracing::error!(message = %issue.message, "config error"),
            tg_domain::config::ConfigSeverity::Warning => tracing::warn!(message = %issue.message, "config warning"),
        }
    }
    if config.has_fatal_issues() {
        anyhow::bail!("refusing to start with a fatal configuration error");
    }

    let store = Arc::new(Store::new(&config.store.state_dir).context("opening store")?);
    let classifier = Arc::new(Classifier::new().context("compiling classifier patterns")?);

    let smart_rule = Arc::new(SmartRuleEvaluator::new(tg_smart_rule::SmartRuleConfig {
        endpoint: config.smart_rule.endpoint.clone(),
        api_key: config.smart_rule.api_key.clone(),
        model: config.smart_rule.model.clone(),
        timeout: std::time::Duration::from_millis(config.smart_rule.timeout_ms),
    }));
    let evaluator = Arc::new(Evaluator::new(store.clone(), smart_rule));

    let notifier: Arc<dyn Notifier> = match config.notifier.webhook_url.as_ref() {
        Some(url) => {
            tracing::info!(url = %url, "dispatching approval notifications via webhook");
            Arc::new(WebhookNotifier::new(url.clone()))
        }
        None => {
            tracing::info!("no notifier.webhook_url configured; approval notifications are log-only");
            Arc::new(LogNotifier)
        }
    };

    let admin_token_hash = match config.server.api_token.as_ref() {
        Some(token) if !token.is_empty() => Some(Sha256::digest(token.as_bytes()).to_vec()),
        _ => {
            tracing::warn!("server.api_token is unset; admin endpoints are unauthenticated");
            None
        }
    };

    let state = AppState {
        config: config.clone(),
        store,
        classifier,
        evaluator,
        notifier,
        admin_token_hash,
    };

    let cors_layer = build_cors_layer(config.server.cors_allow_any_origin);

    let app = api::router(state.clone())
        .layer(cors_layer)
        .layer(tower::limit::ConcurrencyLimitLayer::new(256))
        .with_state(state);

    let listener = tokio::net::TcpListener::bind(&config.server.bind_addr)
        .await
        .with_context(|| format!("binding to {}", config.server.bind_addr))?;

    tracing::info!(addr = %config.server.bind_addr, "toolguard listening");

    axum::serve(listener, app).await.context("axum server error")?;

    Ok(())
}

fn build_cors_layer(allow_any_origin: bool) -> CorsLayer {
    use axum::http::header;

    if allow_any_origin {
        tracing::warn!("CORS configured with wildcard origin — all origins allowed");
        return CorsLayer::new()
            .allow_origin(tower_http::cors::Any)
            .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE, Method::OPTIONS])
            .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION]);
    }

    CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION])
}
