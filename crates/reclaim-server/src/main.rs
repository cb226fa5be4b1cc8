use std::sync::Arc;

use anyhow::Result;
use tracing::info;

use reclaim_server::{scheduler, state::AppState};

/// `reclaim health`: liveness check for Docker HEALTHCHECK.
///
/// Calls `GET http://localhost:$RECLAIM_PORT/health`; exits 0 on HTTP 200.
fn run_health_check() -> ! {
    let port = std::env::var("RECLAIM_PORT").unwrap_or_else(|_| "3000".to_string());
    let url = format!("http://localhost:{}/health", port);
    match ureq::get(&url).call() {
        Ok(resp) if resp.status() == 200 => std::process::exit(0),
        _ => std::process::exit(1),
    }
}

fn print_summary(pass: &str, summary: &impl serde::Serialize) -> Result<()> {
    println!("{}", serde_json::to_string(&serde_json::json!({ "pass": pass, "data": summary }))?);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let args: Vec<String> = std::env::args().collect();
    let command = args.get(1).map(String::as_str);
    if command == Some("health") {
        run_health_check();
    }

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("reclaim=info".parse()?),
        )
        .json()
        .init();

    let cfg = reclaim_core::config::Config::from_env().map_err(|e| anyhow::anyhow!(e))?;

    std::fs::create_dir_all(&cfg.data_dir)?;
    let db_path = format!("{}/reclaim.db", cfg.data_dir);
    let db = reclaim_duckdb::DuckDbBackend::open(&db_path, &cfg.duckdb_memory_limit)?;

    let state = Arc::new(AppState::from_config(db, cfg.clone())?);

    // One-shot passes for cron-style deployments.
    match command {
        Some("detect") => {
            let detection = state.engine.run_detection(chrono::Utc::now()).await?;
            return print_summary("detection", &detection);
        }
        Some("schedule") => {
            let scheduling = state.engine.run_scheduling(chrono::Utc::now()).await?;
            return print_summary("scheduling", &scheduling);
        }
        Some("report") => {
            let reporting = scheduler::report_once(&state).await?;
            return print_summary("conversions", &reporting);
        }
        Some("serve") | None => {}
        Some(other) => anyhow::bail!(
            "unknown command {other:?}; expected serve, detect, schedule, report or health"
        ),
    }

    {
        let state = Arc::clone(&state);
        tokio::spawn(async move {
            scheduler::run_scheduler_loop(state).await;
        });
    }
    {
        let state = Arc::clone(&state);
        tokio::spawn(async move {
            scheduler::run_reporter_loop(state).await;
        });
    }

    let addr = format!("0.0.0.0:{}", cfg.port);
    let app = reclaim_server::app::build_app(Arc::clone(&state));

    info!(
        port = cfg.port,
        abandon_threshold_minutes = cfg.abandon_threshold_minutes,
        "Reclaim listening on {}",
        addr
    );

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            tokio::signal::ctrl_c().await.ok();
        })
        .await?;

    Ok(())
}
