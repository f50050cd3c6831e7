// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025 Jonathan D. A. Jewell <hyperpolymath>

//! Web dashboard for Riskscan

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Query, State,
    },
    http::StatusCode,
    response::{Html, IntoResponse, Json, Response},
    routing::{delete, get, post},
    Router,
};
use futures_util::{SinkExt, StreamExt};
use minijinja::{context, AutoEscape, Environment};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{debug, info, warn};

use crate::config::AppConfig;
use crate::history::RunHistory;
use crate::pipeline::{Pipeline, ProgressEvent, RunSummary};
use crate::session::Session;
use crate::RiskscanError;

/// Shared application state
pub struct AppState {
    pub session: Session,
    pub config: AppConfig,
}

impl AppState {
    /// State backed by the Gemini pipeline and the configured history file
    pub fn from_config(config: AppConfig) -> Self {
        let session = Session::new(
            Pipeline::new(config.clone()),
            RunHistory::new(PathBuf::from(&config.history.path)),
            config.web.log_buffer,
        );
        Self { session, config }
    }
}

/// Create the web application router
pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        // Pages
        .route("/", get(index_page))
        .route("/ws", get(ws_handler))
        // API endpoints
        .route("/api/status", get(api_status))
        .route("/api/analyze/folder", post(api_analyze_folder))
        .route("/api/analyze/files", post(api_analyze_files))
        .route("/api/stop", post(api_stop))
        .route("/api/files", get(api_get_files).post(api_add_files).delete(api_remove_files))
        .route("/api/files/all", delete(api_clear_files))
        .route("/api/history", get(api_history))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// JSON error body with a status derived from the error kind
pub struct ApiError(RiskscanError);

impl From<RiskscanError> for ApiError {
    fn from(e: RiskscanError) -> Self {
        Self(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match self.0 {
            RiskscanError::InvalidInput(_) => StatusCode::BAD_REQUEST,
            RiskscanError::Busy => StatusCode::CONFLICT,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        (status, Json(serde_json::json!({ "error": self.0.to_string() }))).into_response()
    }
}

// === Page Handlers ===

async fn index_page(State(state): State<Arc<AppState>>) -> Result<Html<String>, ApiError> {
    Ok(Html(render_index(&state.config)?))
}

async fn ws_handler(ws: WebSocketUpgrade, State(state): State<Arc<AppState>>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| stream_log(socket, state))
}

/// Replay the current log, then forward every event until the client leaves
async fn stream_log(socket: WebSocket, state: Arc<AppState>) {
    let (backlog, mut rx) = state.session.subscribe();
    let (mut sender, mut receiver) = socket.split();

    for text in backlog {
        if send_event(&mut sender, &ProgressEvent::Line { text }).await.is_err() {
            return;
        }
    }

    let send_task = tokio::spawn(async move {
        loop {
            match rx.recv().await {
                Ok(event) => {
                    if send_event(&mut sender, &event).await.is_err() {
                        break;
                    }
                }
                Err(RecvError::Lagged(skipped)) => {
                    warn!("Log client lagged, {} events dropped", skipped);
                }
                Err(RecvError::Closed) => break,
            }
        }
    });

    // Nothing is expected from the client; this only notices the close
    while let Some(Ok(msg)) = receiver.next().await {
        if let Message::Close(_) = msg {
            break;
        }
    }

    send_task.abort();
    debug!("Log client disconnected");
}

async fn send_event<S>(sender: &mut S, event: &ProgressEvent) -> Result<(), axum::Error>
where
    S: futures_util::Sink<Message, Error = axum::Error> + Unpin,
{
    let json = serde_json::to_string(event).unwrap_or_default();
    sender.send(Message::Text(json)).await
}

// === API Handlers ===

#[derive(Serialize)]
struct StatusResponse {
    running: bool,
    files: Vec<PathBuf>,
    log_lines: usize,
}

async fn api_status(State(state): State<Arc<AppState>>) -> Json<StatusResponse> {
    Json(StatusResponse {
        running: state.session.is_running(),
        files: state.session.selection().paths().to_vec(),
        log_lines: state.session.log_lines().len(),
    })
}

#[derive(Deserialize)]
struct FolderRequest {
    path: String,
}

#[derive(Serialize)]
struct Accepted {
    started: bool,
}

async fn api_analyze_folder(
    State(state): State<Arc<AppState>>,
    Json(request): Json<FolderRequest>,
) -> Result<Json<Accepted>, ApiError> {
    let path = PathBuf::from(request.path.trim());
    info!("Folder analysis requested: {:?}", path);
    state.session.start_folder(&path)?;
    Ok(Json(Accepted { started: true }))
}

async fn api_analyze_files(State(state): State<Arc<AppState>>) -> Result<Json<Accepted>, ApiError> {
    info!("File analysis requested");
    state.session.start_files()?;
    Ok(Json(Accepted { started: true }))
}

#[derive(Serialize)]
struct StopResponse {
    stopping: bool,
}

async fn api_stop(State(state): State<Arc<AppState>>) -> Json<StopResponse> {
    Json(StopResponse { stopping: state.session.stop() })
}

#[derive(Serialize)]
struct FilesResponse {
    files: Vec<PathBuf>,
    changed: usize,
}

fn files_response(state: &AppState, changed: usize) -> Json<FilesResponse> {
    Json(FilesResponse {
        files: state.session.selection().paths().to_vec(),
        changed,
    })
}

async fn api_get_files(State(state): State<Arc<AppState>>) -> Json<FilesResponse> {
    files_response(&state, 0)
}

#[derive(Deserialize)]
struct AddFilesRequest {
    paths: Vec<String>,
}

async fn api_add_files(
    State(state): State<Arc<AppState>>,
    Json(request): Json<AddFilesRequest>,
) -> Json<FilesResponse> {
    let paths = request.paths
        .iter()
        .map(|p| p.trim())
        .filter(|p| !p.is_empty())
        .map(PathBuf::from);
    let added = state.session.add_files(paths);
    files_response(&state, added)
}

#[derive(Deserialize)]
struct RemoveFilesRequest {
    indices: Vec<usize>,
}

async fn api_remove_files(
    State(state): State<Arc<AppState>>,
    Json(request): Json<RemoveFilesRequest>,
) -> Json<FilesResponse> {
    let removed = state.session.remove_files(&request.indices);
    files_response(&state, removed)
}

async fn api_clear_files(State(state): State<Arc<AppState>>) -> Json<FilesResponse> {
    state.session.clear_files();
    files_response(&state, 0)
}

#[derive(Deserialize)]
struct HistoryQuery {
    limit: Option<usize>,
}

async fn api_history(
    State(state): State<Arc<AppState>>,
    Query(query): Query<HistoryQuery>,
) -> Result<Json<Vec<RunSummary>>, ApiError> {
    let runs = state.session.history().get_recent(query.limit.unwrap_or(20))?;
    Ok(Json(runs))
}

// === Template Rendering ===

const META_LINE: &str = "Model: {{ model }} · Extensions: {{ extensions }} · \
Folder report: {{ folder_report }} · File report: {{ files_report }}";

/// Config summary shown under the log, HTML-escaped
fn render_meta(config: &AppConfig) -> crate::Result<String> {
    let mut env = Environment::new();
    env.set_auto_escape_callback(|_| AutoEscape::Html);
    Ok(env.render_str(META_LINE, context! {
        model => config.engine.model,
        extensions => config.scan.extensions.join(", "),
        folder_report => config.report.folder_output,
        files_report => config.report.files_output,
    })?)
}

fn render_index(config: &AppConfig) -> crate::Result<String> {
    let meta = render_meta(config)?;
    Ok(format!(r#"<!DOCTYPE html>
<html lang="en">
<head>
    <meta charset="UTF-8">
    <meta name="viewport" content="width=device-width, initial-scale=1.0">
    <title>Riskscan - Hybrid AI Code Analyzer</title>
    <style>
        :root {{
            --bg-primary: #1a1a2e;
            --bg-secondary: #16213e;
            --bg-card: #0f3460;
            --text-primary: #e8e8e8;
            --text-secondary: #a0a0a0;
            --accent: #e94560;
            --success: #00d9a5;
            --border: #2a2a4a;
        }}
        * {{ box-sizing: border-box; margin: 0; padding: 0; }}
        body {{
            font-family: -apple-system, BlinkMacSystemFont, 'Segoe UI', Roboto, sans-serif;
            background: var(--bg-primary);
            color: var(--text-primary);
            line-height: 1.6;
        }}
        .container {{ max-width: 1000px; margin: 0 auto; padding: 20px; }}
        nav {{
            background: var(--bg-secondary);
            padding: 15px 20px;
            border-bottom: 1px solid var(--border);
            font-size: 1.4em;
            font-weight: bold;
            color: var(--accent);
        }}
        .tabs {{ display: flex; gap: 10px; margin-bottom: 15px; }}
        .tabs button.active {{ background: var(--accent); }}
        .card {{
            background: var(--bg-card);
            border-radius: 12px;
            padding: 20px;
            margin-bottom: 20px;
        }}
        .card h2 {{ margin-bottom: 15px; color: var(--accent); }}
        .hidden {{ display: none; }}
        .row {{ display: flex; gap: 10px; margin-bottom: 10px; }}
        input, textarea, select {{
            flex: 1;
            background: var(--bg-secondary);
            color: var(--text-primary);
            border: 1px solid var(--border);
            border-radius: 6px;
            padding: 8px;
        }}
        select {{ min-height: 160px; }}
        button {{
            background: var(--bg-secondary);
            color: var(--text-primary);
            border: 1px solid var(--border);
            border-radius: 6px;
            padding: 8px 16px;
            cursor: pointer;
        }}
        button.primary {{ background: var(--success); color: #102020; font-weight: bold; }}
        button.danger {{ border-color: var(--accent); color: var(--accent); }}
        button:disabled {{ opacity: 0.4; cursor: not-allowed; }}
        #log {{
            background: #2a2a2a;
            color: #cccccc;
            font-family: monospace;
            font-size: 0.9em;
            white-space: pre-wrap;
            height: 320px;
            overflow-y: auto;
            padding: 10px;
            border-radius: 6px;
        }}
        .meta {{ color: var(--text-secondary); font-size: 0.85em; }}
    </style>
</head>
<body>
    <nav>Riskscan</nav>
    <main class="container">
        <div class="tabs">
            <button id="tab-folder" class="active" onclick="showTab('folder')">📁 Folder analysis</button>
            <button id="tab-files" onclick="showTab('files')">📄 File analysis</button>
        </div>

        <div id="pane-folder" class="card">
            <h2>Analyze a whole project, grouped into feature units</h2>
            <div class="row">
                <input id="folder" placeholder="/path/to/project" autocomplete="off">
            </div>
            <button class="primary start" onclick="startFolder()">▶️ Start folder analysis</button>
        </div>

        <div id="pane-files" class="card hidden">
            <h2>Analyze individually selected files</h2>
            <div class="row">
                <textarea id="new-files" rows="3" placeholder="Paste or drop file paths here, one per line"></textarea>
            </div>
            <div class="row">
                <button onclick="addFiles()">➕ Add files</button>
                <button class="danger" onclick="removeFiles()">🗑️ Remove selected</button>
                <button onclick="clearFiles()">❌ Clear all</button>
            </div>
            <div class="row">
                <select id="file-list" multiple></select>
            </div>
            <button class="primary start" onclick="startFiles()">▶️ Start file analysis</button>
        </div>

        <div class="row">
            <button id="stop" class="danger" onclick="stopRun()" disabled>⏹️ Stop analysis</button>
        </div>

        <div class="card">
            <h2>Analysis log</h2>
            <div id="log"></div>
            <p class="meta">{meta}</p>
        </div>
    </main>
    <script>
        const log = document.getElementById('log');

        function showTab(name) {{
            for (const t of ['folder', 'files']) {{
                document.getElementById('pane-' + t).classList.toggle('hidden', t !== name);
                document.getElementById('tab-' + t).classList.toggle('active', t === name);
            }}
        }}

        function setRunning(running) {{
            document.querySelectorAll('.start, .tabs button').forEach(b => b.disabled = running);
            document.getElementById('stop').disabled = !running;
        }}

        function append(text) {{
            log.textContent += text + '\n';
            log.scrollTop = log.scrollHeight;
        }}

        async function api(method, url, body) {{
            const res = await fetch(url, {{
                method,
                headers: {{ 'Content-Type': 'application/json' }},
                body: body === undefined ? undefined : JSON.stringify(body),
            }});
            const data = await res.json();
            if (!res.ok) {{ alert(data.error); throw new Error(data.error); }}
            return data;
        }}

        function renderFiles(files) {{
            const list = document.getElementById('file-list');
            list.innerHTML = '';
            files.forEach(f => {{
                const opt = document.createElement('option');
                opt.textContent = f;
                list.appendChild(opt);
            }});
        }}

        async function startFolder() {{
            await api('POST', '/api/analyze/folder', {{ path: document.getElementById('folder').value }});
            setRunning(true);
        }}

        async function startFiles() {{
            await api('POST', '/api/analyze/files');
            setRunning(true);
        }}

        async function stopRun() {{
            await api('POST', '/api/stop');
            document.getElementById('stop').disabled = true;
        }}

        async function addFiles() {{
            const box = document.getElementById('new-files');
            const paths = box.value.split('\n').map(p => p.trim()).filter(p => p);
            renderFiles((await api('POST', '/api/files', {{ paths }})).files);
            box.value = '';
        }}

        async function removeFiles() {{
            const indices = [...document.getElementById('file-list').options]
                .map((o, i) => o.selected ? i : -1).filter(i => i >= 0);
            renderFiles((await api('DELETE', '/api/files', {{ indices }})).files);
        }}

        async function clearFiles() {{
            renderFiles((await api('DELETE', '/api/files/all')).files);
        }}

        function connect() {{
            const proto = location.protocol === 'https:' ? 'wss' : 'ws';
            const ws = new WebSocket(proto + '://' + location.host + '/ws');
            ws.onopen = () => {{ log.textContent = ''; }};
            ws.onmessage = (msg) => {{
                const event = JSON.parse(msg.data);
                if (event.type === 'started') {{ log.textContent = ''; setRunning(true); }}
                else if (event.type === 'line') {{ append(event.text); }}
                else if (event.type === 'finished') {{ setRunning(false); }}
            }};
            ws.onclose = () => setTimeout(connect, 1000);
        }}

        api('GET', '/api/status').then(s => {{ setRunning(s.running); renderFiles(s.files); }});
        connect();
    </script>
</body>
</html>"#,
        meta = meta,
    ))
}

/// Start the web server with the given config
pub async fn start_server(config: AppConfig) -> crate::Result<()> {
    let addr = format!("{}:{}", config.web.host, config.web.port);
    let state = Arc::new(AppState::from_config(config));

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!("Web UI available at http://{}", addr);

    let router = create_router(state);
    axum::serve(listener, router).await
        .map_err(|e| crate::RiskscanError::Config(format!("Server error: {}", e)))?;

    Ok(())
}
