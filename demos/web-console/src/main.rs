//! Browser console for container logs and interactive commands.
//!
//! Run with: cargo run -p web-console -- --config console.toml
//!
//! Then open http://localhost:3000 in your browser.

mod config;

use std::{net::SocketAddr, path::PathBuf, sync::Arc};

use anyhow::Context;
use axum::{Router, response::Html, routing::get};
use clap::Parser;
use container_relay_runtime::CliRuntime;
use container_relay_session::{SessionRegistry, SessionRelay};
use container_relay_transport::{WsState, ws_router};
use tower_http::cors::CorsLayer;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::ConsoleConfig;

#[derive(Debug, Parser)]
#[command(name = "web-console", version, about)]
struct Cli {
    /// TOML configuration file.
    #[arg(short, long, env = "CONTAINER_RELAY_CONFIG")]
    config: Option<PathBuf>,

    /// Listen address, overriding the configuration.
    #[arg(long)]
    bind: Option<SocketAddr>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let mut config =
        ConsoleConfig::load(cli.config.as_deref()).context("loading configuration")?;
    if let Some(bind) = cli.bind {
        config.server.bind = bind;
    }

    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(&config.logging.level)),
        )
        .init();

    let runtime = CliRuntime::detect(config.runtime.clone())
        .await
        .context("detecting container runtime")?;
    let registry = Arc::new(SessionRegistry::new());
    let relay = SessionRelay::new(Arc::new(runtime), Arc::clone(&registry));

    let app = Router::new()
        .route("/", get(index_handler))
        .merge(ws_router(WsState::new(relay)))
        .layer(CorsLayer::permissive());

    let addr = config.server.bind;
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("binding {addr}"))?;
    tracing::info!("Server listening on http://{addr}");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("running server")?;

    tracing::info!(stats = ?registry.stats(), "Registry totals");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for ctrl-c: {e}");
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutting down");
}

async fn index_handler() -> Html<&'static str> {
    Html(INDEX_HTML)
}

const INDEX_HTML: &str = r#"<!DOCTYPE html>
<html>
<head>
    <title>Container Console</title>
    <link rel="stylesheet" href="https://cdn.jsdelivr.net/npm/xterm@5.3.0/css/xterm.css" />
    <script src="https://cdn.jsdelivr.net/npm/xterm@5.3.0/lib/xterm.js"></script>
    <script src="https://cdn.jsdelivr.net/npm/xterm-addon-fit@0.8.0/lib/xterm-addon-fit.js"></script>
    <style>
        body {
            margin: 0;
            padding: 20px;
            background: #1e1e1e;
            font-family: system-ui, sans-serif;
            color: #ccc;
        }
        h1 { color: #fff; margin-bottom: 10px; }
        form { margin-bottom: 10px; display: flex; gap: 8px; }
        input, select, button { background: #2d2d2d; color: #eee; border: 1px solid #444; padding: 4px 8px; }
        #terminal-container {
            width: 100%;
            height: calc(100vh - 150px);
        }
        .status {
            color: #888;
            font-size: 14px;
            margin-bottom: 10px;
        }
        .connected { color: #4a4; }
        .disconnected { color: #a44; }
    </style>
</head>
<body>
    <h1>Container Console</h1>
    <form id="open">
        <select id="kind">
            <option value="logtail">Log tail</option>
            <option value="command">Command</option>
        </select>
        <input id="target" placeholder="[node/]container" required />
        <input id="command" placeholder="sh" />
        <button type="submit">Open</button>
        <button type="button" id="kill">Kill</button>
        <button type="button" id="detach">Detach</button>
    </form>
    <div class="status" id="status">Idle</div>
    <div id="terminal-container"></div>

    <script>
        const term = new Terminal({
            cursorBlink: true,
            fontSize: 14,
            fontFamily: 'Menlo, Monaco, "Courier New", monospace',
            theme: {
                background: '#1e1e1e',
                foreground: '#d4d4d4',
            }
        });

        const fitAddon = new FitAddon.FitAddon();
        term.loadAddon(fitAddon);
        term.open(document.getElementById('terminal-container'));
        fitAddon.fit();

        const status = document.getElementById('status');
        let ws;

        function isOpen() {
            return ws && ws.readyState === WebSocket.OPEN;
        }

        function control(action, extra) {
            if (isOpen()) {
                ws.send(JSON.stringify(Object.assign({ action }, extra || {})));
            }
        }

        function open(request) {
            if (ws) {
                ws.close();
            }
            term.reset();
            const protocol = window.location.protocol === 'https:' ? 'wss:' : 'ws:';
            ws = new WebSocket(`${protocol}//${window.location.host}/ws`);

            ws.onopen = () => {
                status.textContent = 'Opening ' + request.target + '...';
                status.className = 'status';
                ws.send(JSON.stringify(request));
            };

            ws.onclose = (event) => {
                status.textContent = event.code === 1000 ? 'Session ended' : 'Session failed';
                status.className = 'status disconnected';
            };

            ws.onerror = (err) => {
                console.error('WebSocket error:', err);
            };

            ws.onmessage = (event) => {
                try {
                    const msg = JSON.parse(event.data);
                    if (msg.data !== undefined) {
                        term.write(msg.data);
                    } else if (msg.session !== undefined) {
                        status.textContent = 'Connected: ' + msg.session;
                        status.className = 'status connected';
                        control('resize', { cols: term.cols, rows: term.rows });
                    } else if (msg.error !== undefined) {
                        term.writeln(`\r\n[Error: ${msg.error}]\r\n`);
                    }
                } catch (e) {
                    console.error('Failed to parse message:', e);
                }
            };
        }

        document.getElementById('open').addEventListener('submit', (event) => {
            event.preventDefault();
            const kind = document.getElementById('kind').value;
            const request = { kind, target: document.getElementById('target').value };
            if (kind === 'command') {
                request.command = document.getElementById('command').value || 'sh';
            }
            open(request);
        });

        document.getElementById('kill').addEventListener('click', () => control('kill'));
        document.getElementById('detach').addEventListener('click', () => control('detach'));

        // Raw keystrokes are interactive input
        term.onData((data) => {
            if (isOpen()) {
                ws.send(data);
            }
        });

        window.addEventListener('resize', () => {
            fitAddon.fit();
            control('resize', { cols: term.cols, rows: term.rows });
        });
    </script>
</body>
</html>
"#;
