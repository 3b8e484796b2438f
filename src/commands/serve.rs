use crate::builtin_tools;
use assistant_runtime::surface::{AppState, Orchestrators, SurfaceMetrics};
use assistant_runtime::{surface, Config, Runtime};
use clap::ArgMatches;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

pub async fn run(matches: &ArgMatches) {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let config_path = matches.get_one::<String>("config").map(PathBuf::from);
    let mut config = match Config::load(config_path.as_deref()) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("failed to load configuration: {e}");
            std::process::exit(1);
        }
    };

    if let Some(port) = matches.get_one::<String>("port").and_then(|p| p.parse().ok()) {
        config.api.port = port;
    }
    if let Some(bind) = matches.get_one::<String>("bind") {
        config.api.bind_address = bind.clone();
    }

    let Some(api_token) = config.api.api_token.clone() else {
        eprintln!("no API token configured — set ASSISTANT_API_TOKEN or pass it in the config file");
        std::process::exit(1);
    };

    let runtime = Runtime::new(config.clone(), builtin_tools::descriptors(), builtin_tools::bodies());

    let state = AppState {
        registry: runtime.registry.clone(),
        tool_executor: runtime.tool_executor.clone(),
        event_store: runtime.event_store.clone(),
        rate_limiter: runtime.rate_limiter.clone(),
        rate_limit_scope: config.rate_limit.scope,
        orchestrators: Arc::new(Orchestrators {
            standard: runtime.standard.clone(),
            review: runtime.review.clone(),
            chunked: runtime.chunked.clone(),
            combined: runtime.combined.clone(),
        }),
        mode_heuristic: runtime.mode_heuristic.clone(),
        telemetry_hints: runtime.telemetry_hints.clone(),
        upstream: runtime.upstream.clone(),
        metrics: Arc::new(SurfaceMetrics::default()),
        api_token: Some(Arc::from(api_token.as_str())),
        start_time: Instant::now(),
    };

    let router = surface::create_router(state, &config.api);
    let addr = format!("{}:{}", config.api.bind_address, config.api.port);

    let listener = match tokio::net::TcpListener::bind(&addr).await {
        Ok(l) => l,
        Err(e) => {
            eprintln!("failed to bind {addr}: {e}");
            std::process::exit(1);
        }
    };

    tracing::info!(%addr, "assistant-core listening");
    if let Err(e) = axum::serve(listener, router).await {
        eprintln!("server error: {e}");
        std::process::exit(1);
    }
}
