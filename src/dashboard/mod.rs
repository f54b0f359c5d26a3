use axum::{
    extract::{
        ws::{Message, WebSocket},
        State, WebSocketUpgrade,
    },
    http::StatusCode,
    response::{Html, IntoResponse},
    routing::{get, post},
    Json, Router,
};
use std::sync::Arc;
use tokio::sync::broadcast;
use tower_http::cors::CorsLayer;
use tracing::{debug, warn};

use crate::feed::models::Transition;
use crate::tracker::{MatchStore, TrackerService};

#[derive(Clone)]
pub struct AppState {
    pub tracker: Arc<TrackerService>,
    pub store: Arc<MatchStore>,
    pub topic: broadcast::Sender<Transition>,
}

/// Build the Axum router for the dashboard and admin surface.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(index_handler))
        .route("/api/matches", get(matches_handler))
        .route("/api/health", get(health_handler))
        .route("/api/refresh", post(refresh_handler))
        .route("/api/cache/clear", post(cache_clear_handler))
        .route("/ws", get(ws_handler))
        .layer(CorsLayer::permissive())
        .with_state(Arc::new(state))
}

async fn index_handler() -> impl IntoResponse {
    Html(DASHBOARD_HTML)
}

/// GET /api/matches: copy-on-read view of the currently tracked matches.
async fn matches_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(state.store.snapshot())
}

/// GET /api/health: 200 when fresh, 503 once the last successful update
/// exceeds the configured age threshold.
async fn health_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let report = state.tracker.health();
    let status = if report.healthy {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (status, Json(report))
}

/// POST /api/refresh: reset the scheduler and poll immediately.
async fn refresh_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    state.tracker.force_refresh();
    Json(serde_json::json!({ "status": "refresh scheduled" }))
}

/// POST /api/cache/clear: drop enrichment cache and store bookkeeping.
async fn cache_clear_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    state.tracker.clear_caches();
    Json(serde_json::json!({ "status": "caches cleared" }))
}

/// GET /ws: live transition topic. Sends the current match set once on
/// connect, then forwards every transition as it is dispatched.
async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(mut socket: WebSocket, state: Arc<AppState>) {
    let initial = serde_json::json!({
        "type": "snapshot",
        "matches": state.store.snapshot(),
    });
    if socket
        .send(Message::Text(initial.to_string()))
        .await
        .is_err()
    {
        return;
    }

    let mut rx = state.topic.subscribe();

    loop {
        tokio::select! {
            incoming = socket.recv() => {
                match incoming {
                    // Clients only ever close or ping; payloads are ignored.
                    None | Some(Err(_)) => break,
                    Some(Ok(Message::Close(_))) => break,
                    Some(Ok(_)) => {}
                }
            }
            transition = rx.recv() => {
                match transition {
                    Ok(transition) => {
                        let text = match serde_json::to_string(&transition) {
                            Ok(t) => t,
                            Err(e) => {
                                warn!("Failed to serialize transition: {}", e);
                                continue;
                            }
                        };
                        if socket.send(Message::Text(text)).await.is_err() {
                            break;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        debug!("WebSocket subscriber lagged, skipped {} transitions", skipped);
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        }
    }
}

const DASHBOARD_HTML: &str = r#"<!DOCTYPE html>
<html lang="en">
<head>
  <meta charset="utf-8">
  <title>spike-tracker</title>
  <style>
    body { font-family: system-ui, sans-serif; background: #14141b; color: #eee; margin: 2rem; }
    h1 { color: #ff4655; }
    table { border-collapse: collapse; width: 100%; margin-top: 1rem; }
    th, td { text-align: left; padding: .5rem .75rem; border-bottom: 1px solid #333; }
    a { color: #6cf; }
    .muted { color: #888; }
  </style>
</head>
<body>
  <h1>spike-tracker</h1>
  <p class="muted" id="status">connecting…</p>
  <table>
    <thead><tr><th>Match</th><th>Score</th><th>Map</th><th>Event</th><th>Stream</th></tr></thead>
    <tbody id="matches"></tbody>
  </table>
  <script>
    const tbody = document.getElementById('matches');
    const status = document.getElementById('status');
    const render = (matches) => {
      tbody.innerHTML = '';
      for (const m of matches) {
        const row = document.createElement('tr');
        const stream = m.stream_link ? `<a href="${m.stream_link}">watch</a>` : '—';
        row.innerHTML = `<td><a href="${m.match_page}">${m.team1} vs ${m.team2}</a></td>`
          + `<td>${m.score1 ?? '?'} - ${m.score2 ?? '?'}</td>`
          + `<td>${m.current_map ?? ''}</td><td>${m.match_event ?? ''}</td><td>${stream}</td>`;
        tbody.appendChild(row);
      }
      status.textContent = matches.length ? `${matches.length} live match(es)` : 'no live matches';
    };
    const refresh = () => fetch('/api/matches').then(r => r.json()).then(render);
    const wsProto = location.protocol === 'https:' ? 'wss:' : 'ws:';
    const ws = new WebSocket(`${wsProto}//${location.host}/ws`);
    ws.onmessage = (ev) => {
      const msg = JSON.parse(ev.data);
      if (msg.type === 'snapshot') render(msg.matches); else refresh();
    };
    ws.onclose = () => { status.textContent = 'disconnected'; };
  </script>
</body>
</html>
"#;
