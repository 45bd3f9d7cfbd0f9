//! Demo server streaming simulated install and job progress.
//!
//! Run with: cargo run -p feed-server-demo
//!
//! Then open http://localhost:3000 in your browser.

mod config;
mod producer;

use std::{net::SocketAddr, path::PathBuf, sync::Arc};

use anyhow::{Context, Result};
use axum::{response::Html, routing::get};
use clap::Parser;
use task_feed_bridge::StopSignal;
use task_feed_core::{MemoryEventStore, StoreConnector};
use task_feed_session::{FeedProfile, TaskFeed};
use task_feed_transport::{AllowAll, AllowList, Authorizer, FeedRoutes};
use tower_http::cors::CorsLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::ServerConfig;

#[derive(Parser)]
#[command(name = "feed-server")]
#[command(about = "Live task progress feeds over server-sent events")]
struct Cli {
    /// Address to listen on (overrides the config file)
    #[arg(long)]
    bind: Option<SocketAddr>,

    /// Config file
    #[arg(long, default_value = "feed.toml")]
    config: PathBuf,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let cli = Cli::parse();
    let config: ServerConfig = config::load(&cli.config, cli.bind)
        .extract()
        .with_context(|| format!("Invalid configuration in {}", cli.config.display()))?;

    let store = MemoryEventStore::new();
    let stop = StopSignal::new();
    let producer = producer::spawn(store.clone(), config.simulate.clone(), stop.clone())
        .context("Failed to start the producer")?;

    let connector: Arc<dyn StoreConnector> = Arc::new(store);
    let authorizer: Arc<dyn Authorizer> = if config.viewers.is_empty() {
        Arc::new(AllowAll)
    } else {
        Arc::new(AllowList::new(config.viewers.clone()))
    };
    let feed = |profile| TaskFeed::new(profile, config.feed.clone(), Arc::clone(&connector));

    let app = FeedRoutes::new(authorizer)
        .mount("/api/install/progress", feed(FeedProfile::agent_install()))
        .mount("/api/uninstall/progress", feed(FeedProfile::agent_uninstall()))
        .mount("/api/jobs/logs", feed(FeedProfile::job_execution()))
        .into_router()
        .route("/", get(|| async { Html(INDEX_HTML) }))
        .layer(CorsLayer::permissive());

    let listener = tokio::net::TcpListener::bind(config.bind)
        .await
        .with_context(|| format!("Failed to bind {}", config.bind))?;
    tracing::info!(read_mode = ?config.feed.read_mode, "Listening on http://{}", config.bind);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    stop.stop();
    if producer.join().is_err() {
        tracing::warn!("Producer thread panicked");
    }
    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %err, "Failed to listen for shutdown signal");
    }
    tracing::info!("Shutting down");
}

const INDEX_HTML: &str = r#"<!DOCTYPE html>
<html>
<head>
    <title>Task Feed</title>
    <style>
        body { margin: 0; padding: 20px; background: #1e1e1e; color: #d4d4d4; font-family: system-ui, sans-serif; }
        #log { font-family: Menlo, Monaco, monospace; font-size: 13px; white-space: pre-wrap; }
        .status { color: #4a4; }
        .error { color: #a44; }
        .heartbeat { color: #666; }
    </style>
</head>
<body>
    <h1>Task Feed</h1>
    <form id="open">
        <select id="feed">
            <option value="/api/install/progress">install</option>
            <option value="/api/uninstall/progress">uninstall</option>
            <option value="/api/jobs/logs">job</option>
        </select>
        <input id="task" value="demo-1" />
        <button>Watch</button>
    </form>
    <div id="log"></div>

    <script>
        const log = document.getElementById('log');
        let source;

        function line(text, cls) {
            const div = document.createElement('div');
            div.textContent = text;
            if (cls) div.className = cls;
            log.appendChild(div);
        }

        document.getElementById('open').onsubmit = (e) => {
            e.preventDefault();
            if (source) source.close();
            log.textContent = '';
            const url = `${document.getElementById('feed').value}/${document.getElementById('task').value}`;
            source = new EventSource(url);

            source.onmessage = (event) => {
                const msg = JSON.parse(event.data);
                if (msg.type === 'log') {
                    line(`[${msg.host_id}] ${msg.step_id} ${msg.level}: ${msg.message}`);
                } else if (msg.type === 'status') {
                    line(`status: ${msg.status}`, 'status');
                } else if (msg.type === 'error') {
                    line(`error: ${msg.message}`, 'error');
                } else {
                    line(msg.message || msg.type);
                }
            };
            source.addEventListener('heartbeat', () => line('.', 'heartbeat'));
            // The server closes the stream once the task is done.
            source.onerror = () => source.close();
        };
    </script>
</body>
</html>
"#;
