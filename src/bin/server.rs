//! Anteroom server — HTTP API and viewer for the run archive.
//!
//! Thin axum server wrapping the shared anteroom_lib database layer. Serves
//! the JSON API under /api, the server-rendered pages at the root, and
//! screenshot files as static content.
//!
//! Usage:
//!   ANTEROOM_DB=/path/to/runs.db ANTEROOM_BIND=0.0.0.0:3990 anteroom-server
//!
//! Or with args:
//!   anteroom-server --db /path/to/runs.db --bind 0.0.0.0:3990 --data-dir /srv/anteroom

use axum::{
    extract::{DefaultBodyLimit, Multipart, Path, Query, State},
    http::StatusCode,
    response::{Html, IntoResponse, Json, Response},
    routing::{delete, get, post},
    Router,
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tower_http::cors::CorsLayer;
use tower_http::services::ServeDir;

use anteroom_lib::accuracy::{self, ScoreSummary};
use anteroom_lib::aggregate::{self, RunDetail};
use anteroom_lib::catalog::{JokerCatalog, JokerInfo};
use anteroom_lib::db::{
    ArchiveStats, Database, Joker, NewJoker, NewRound, NewRun, NewScreenshot, NewStrategy, Round,
    Run, RunListItem, RunPatch, Screenshot, Strategy, StrategyStats, Tag,
};
use anteroom_lib::error::AppError;
use anteroom_lib::lineage::{self, StrategyLineage};
use anteroom_lib::pages;
use anteroom_lib::query::{RunFilter, RunQuery};

const MAX_UPLOAD_SIZE: usize = 10 * 1024 * 1024; // 10MB
const ALLOWED_EXTENSIONS: [&str; 4] = [".png", ".jpg", ".jpeg", ".webp"];

// ============================================================================
// AppState
// ============================================================================

#[derive(Clone)]
struct AppState {
    db: Arc<Database>,
    catalog: Arc<JokerCatalog>,
    screenshot_dir: PathBuf,
    start_time: Instant,
}

// ============================================================================
// Error type
// ============================================================================

struct ApiError(StatusCode, String);

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.0, Json(serde_json::json!({"error": self.1}))).into_response()
    }
}

impl From<AppError> for ApiError {
    fn from(e: AppError) -> Self {
        let status = match &e {
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::InvalidArgument(_) => StatusCode::BAD_REQUEST,
            // A lineage cycle is a data-integrity fault, not a caller mistake
            AppError::CycleDetected(_) => StatusCode::INTERNAL_SERVER_ERROR,
            AppError::Db(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        if status.is_server_error() {
            eprintln!("[Server] Internal error: {}", e);
        }
        ApiError(status, e.to_string())
    }
}

impl From<rusqlite::Error> for ApiError {
    fn from(e: rusqlite::Error) -> Self {
        eprintln!("[Server] Database error: {}", e);
        ApiError(StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
    }
}

fn not_found(msg: impl Into<String>) -> ApiError {
    ApiError(StatusCode::NOT_FOUND, msg.into())
}

fn bad_request(msg: impl Into<String>) -> ApiError {
    ApiError(StatusCode::BAD_REQUEST, msg.into())
}

// ============================================================================
// Request / Response types
// ============================================================================

#[derive(Deserialize)]
struct RunsQuery {
    page: Option<u32>,
    per_page: Option<u32>,
    deck: Option<String>,
    stake: Option<String>,
    won: Option<bool>,
    sort: Option<String>,
    order: Option<String>,
}

#[derive(Serialize)]
struct ListRunsResponse {
    runs: Vec<RunListItem>,
    total: u32,
    page: u32,
    per_page: u32,
    pages: u32,
}

#[derive(Serialize)]
struct RunResponse {
    run: Run,
}

#[derive(Serialize)]
struct JokerResponse {
    joker: Joker,
}

#[derive(Serialize)]
struct JokersResponse {
    jokers: Vec<Joker>,
}

#[derive(Serialize)]
struct RoundResponse {
    round: Round,
}

#[derive(Serialize)]
struct RoundsResponse {
    rounds: Vec<Round>,
}

#[derive(Deserialize)]
struct AddTagRequest {
    #[serde(default)]
    ante: i64,
    name: String,
}

#[derive(Serialize)]
struct TagResponse {
    tag: Tag,
}

#[derive(Serialize)]
struct ScreenshotResponse {
    screenshot: Screenshot,
}

#[derive(Serialize)]
struct DeletedResponse {
    deleted: bool,
}

#[derive(Serialize)]
struct StatsResponse {
    stats: ArchiveStats,
}

#[derive(Serialize)]
struct CatalogResponse<'a> {
    jokers: &'a [JokerInfo],
}

#[derive(Serialize)]
struct StrategyResponse {
    strategy: Strategy,
}

#[derive(Serialize)]
struct StrategyDetailResponse {
    strategy: Strategy,
    runs: Vec<Run>,
}

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    version: String,
    uptime_secs: u64,
}

// ============================================================================
// Helpers
// ============================================================================

/// Parse a played_at value: epoch millis or ISO 8601.
fn parse_timestamp(s: &str) -> Result<i64, ApiError> {
    if let Ok(ms) = s.parse::<i64>() {
        return Ok(ms);
    }
    chrono::DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.timestamp_millis())
        .map_err(|e| bad_request(format!("Invalid timestamp '{}': {}", s, e)))
}

/// Generate a run code when the harness did not supply one.
fn generate_run_code() -> String {
    let day = chrono::Utc::now().format("%Y%m%d");
    let suffix: String = uuid::Uuid::new_v4().simple().to_string()[..6].to_uppercase();
    format!("R{}-{}", day, suffix)
}

/// Group stored score errors by run and summarize each.
fn score_summaries(db: &Database) -> Result<HashMap<i64, ScoreSummary>, ApiError> {
    let mut by_run: HashMap<i64, Vec<f64>> = HashMap::new();
    for (run_id, error) in db.get_score_errors()? {
        by_run.entry(run_id).or_default().push(error);
    }
    let mut out = HashMap::new();
    for (run_id, errors) in by_run {
        if let Some(summary) = accuracy::summarize(&errors) {
            out.insert(run_id, summary);
        }
    }
    Ok(out)
}

// ============================================================================
// Run handlers
// ============================================================================

// GET /api/runs
async fn list_runs_handler(
    State(state): State<AppState>,
    Query(params): Query<RunsQuery>,
) -> Result<Json<ListRunsResponse>, ApiError> {
    let filter = RunFilter { deck: params.deck, stake: params.stake, won: params.won };
    let q = RunQuery::parse(
        filter,
        params.sort.as_deref(),
        params.order.as_deref(),
        params.page,
        params.per_page,
    )
    .map_err(ApiError::from)?;

    let (runs, total) = state.db.list_runs(&q)?;
    Ok(Json(ListRunsResponse {
        runs,
        total,
        page: q.page.page(),
        per_page: q.page.per_page(),
        pages: q.page.total_pages(total),
    }))
}

// GET /api/runs/:id
async fn get_run_handler(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<RunDetail>, ApiError> {
    let detail = aggregate::run_detail(&state.db, id).map_err(ApiError::from)?;
    Ok(Json(detail))
}

// GET /api/runs/by-code/:run_code
async fn get_run_by_code_handler(
    State(state): State<AppState>,
    Path(run_code): Path<String>,
) -> Result<Json<RunDetail>, ApiError> {
    let detail = aggregate::run_detail_by_code(&state.db, &run_code).map_err(ApiError::from)?;
    Ok(Json(detail))
}

// POST /api/runs
async fn create_run_handler(
    State(state): State<AppState>,
    Json(req): Json<NewRun>,
) -> Result<(StatusCode, Json<RunResponse>), ApiError> {
    let run_code = match &req.run_code {
        Some(code) if !code.is_empty() => code.clone(),
        _ => generate_run_code(),
    };
    let played_at = match &req.played_at {
        Some(s) => parse_timestamp(s)?,
        None => chrono::Utc::now().timestamp_millis(),
    };
    let run = state.db.create_run(&req, &run_code, played_at)?;
    println!("[POST /api/runs] Created {} (id: {}, deck: {})", run.run_code, run.id, run.deck);
    Ok((StatusCode::CREATED, Json(RunResponse { run })))
}

// PATCH /api/runs/:id
async fn patch_run_handler(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(patch): Json<RunPatch>,
) -> Result<Json<RunResponse>, ApiError> {
    if patch.is_empty() {
        return Err(bad_request("No valid fields to update"));
    }
    let run = state
        .db
        .patch_run(id, &patch)?
        .ok_or_else(|| not_found("Run not found"))?;
    println!("[PATCH /api/runs/{}] Updated", id);
    Ok(Json(RunResponse { run }))
}

// DELETE /api/runs/:id
async fn delete_run_handler(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<DeletedResponse>, ApiError> {
    state.db.get_run(id)?.ok_or_else(|| not_found("Run not found"))?;

    // Remove screenshot files first; DB rows cascade with the run
    let filenames = state.db.get_screenshot_filenames(id)?;
    for name in &filenames {
        let path = state.screenshot_dir.join(name);
        if let Err(e) = tokio::fs::remove_file(&path).await {
            if e.kind() != std::io::ErrorKind::NotFound {
                eprintln!("[DELETE /api/runs/{}] Failed to remove {}: {}", id, path.display(), e);
            }
        }
    }
    state.db.delete_run(id)?;

    // Prune the now-empty per-run directory
    let run_dir = state.screenshot_dir.join(id.to_string());
    let _ = tokio::fs::remove_dir(&run_dir).await;

    println!("[DELETE /api/runs/{}] Deleted ({} screenshots)", id, filenames.len());
    Ok(Json(DeletedResponse { deleted: true }))
}

// ============================================================================
// Joker / round / tag handlers
// ============================================================================

// POST /api/runs/:id/jokers
async fn add_joker_handler(
    State(state): State<AppState>,
    Path(run_id): Path<i64>,
    Json(req): Json<NewJoker>,
) -> Result<(StatusCode, Json<JokerResponse>), ApiError> {
    state.db.get_run(run_id)?.ok_or_else(|| not_found("Run not found"))?;
    let mut inserted = state.db.insert_jokers(run_id, &[req])?;
    let joker = inserted.remove(0);
    Ok((StatusCode::CREATED, Json(JokerResponse { joker })))
}

// POST /api/runs/:id/jokers/batch
async fn add_jokers_batch_handler(
    State(state): State<AppState>,
    Path(run_id): Path<i64>,
    Json(req): Json<Vec<NewJoker>>,
) -> Result<(StatusCode, Json<JokersResponse>), ApiError> {
    state.db.get_run(run_id)?.ok_or_else(|| not_found("Run not found"))?;
    let jokers = state.db.insert_jokers(run_id, &req)?;
    println!("[POST /api/runs/{}/jokers/batch] Added {} jokers", run_id, jokers.len());
    Ok((StatusCode::CREATED, Json(JokersResponse { jokers })))
}

// POST /api/runs/:id/rounds
async fn add_round_handler(
    State(state): State<AppState>,
    Path(run_id): Path<i64>,
    Json(req): Json<NewRound>,
) -> Result<(StatusCode, Json<RoundResponse>), ApiError> {
    state.db.get_run(run_id)?.ok_or_else(|| not_found("Run not found"))?;
    let mut inserted = state.db.insert_rounds(run_id, &[req])?;
    let round = inserted.remove(0);
    Ok((StatusCode::CREATED, Json(RoundResponse { round })))
}

// POST /api/runs/:id/rounds/batch
async fn add_rounds_batch_handler(
    State(state): State<AppState>,
    Path(run_id): Path<i64>,
    Json(req): Json<Vec<NewRound>>,
) -> Result<(StatusCode, Json<RoundsResponse>), ApiError> {
    state.db.get_run(run_id)?.ok_or_else(|| not_found("Run not found"))?;
    let rounds = state.db.insert_rounds(run_id, &req)?;
    println!("[POST /api/runs/{}/rounds/batch] Added {} rounds", run_id, rounds.len());
    Ok((StatusCode::CREATED, Json(RoundsResponse { rounds })))
}

// POST /api/runs/:id/tags
async fn add_tag_handler(
    State(state): State<AppState>,
    Path(run_id): Path<i64>,
    Json(req): Json<AddTagRequest>,
) -> Result<(StatusCode, Json<TagResponse>), ApiError> {
    state.db.get_run(run_id)?.ok_or_else(|| not_found("Run not found"))?;
    let tag = state.db.insert_tag(run_id, req.ante, &req.name)?;
    Ok((StatusCode::CREATED, Json(TagResponse { tag })))
}

// ============================================================================
// Screenshot handlers
// ============================================================================

// POST /api/runs/:id/screenshots
async fn upload_screenshot_handler(
    State(state): State<AppState>,
    Path(run_id): Path<i64>,
    mut multipart: Multipart,
) -> Result<(StatusCode, Json<ScreenshotResponse>), ApiError> {
    state.db.get_run(run_id)?.ok_or_else(|| not_found("Run not found"))?;

    let mut content: Option<Vec<u8>> = None;
    let mut original_name: Option<String> = None;
    let mut round_id: Option<i64> = None;
    let mut caption: Option<String> = None;
    let mut event_type: Option<String> = None;
    let mut estimated_score: Option<i64> = None;
    let mut actual_score: Option<i64> = None;
    let mut score_error: Option<f64> = None;
    let mut width: Option<i64> = None;
    let mut height: Option<i64> = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| bad_request(format!("Invalid multipart body: {}", e)))?
    {
        let name = field.name().unwrap_or("").to_string();
        match name.as_str() {
            "file" => {
                original_name = field.file_name().map(|s| s.to_string());
                let bytes = field
                    .bytes()
                    .await
                    .map_err(|e| bad_request(format!("Failed to read file: {}", e)))?;
                content = Some(bytes.to_vec());
            }
            _ => {
                let text = field
                    .text()
                    .await
                    .map_err(|e| bad_request(format!("Invalid field '{}': {}", name, e)))?;
                if text.is_empty() {
                    continue;
                }
                match name.as_str() {
                    "caption" => caption = Some(text),
                    "event_type" => event_type = Some(text),
                    "round_id" => {
                        round_id = Some(text.parse().map_err(|_| {
                            bad_request(format!("Invalid round_id '{}'", text))
                        })?)
                    }
                    "estimated_score" => {
                        estimated_score = Some(text.parse().map_err(|_| {
                            bad_request(format!("Invalid estimated_score '{}'", text))
                        })?)
                    }
                    "actual_score" => {
                        actual_score = Some(text.parse().map_err(|_| {
                            bad_request(format!("Invalid actual_score '{}'", text))
                        })?)
                    }
                    "score_error" => {
                        score_error = Some(text.parse().map_err(|_| {
                            bad_request(format!("Invalid score_error '{}'", text))
                        })?)
                    }
                    "width" => {
                        width = Some(text.parse().map_err(|_| {
                            bad_request(format!("Invalid width '{}'", text))
                        })?)
                    }
                    "height" => {
                        height = Some(text.parse().map_err(|_| {
                            bad_request(format!("Invalid height '{}'", text))
                        })?)
                    }
                    _ => {}
                }
            }
        }
    }

    let content = content.ok_or_else(|| bad_request("Missing 'file' field"))?;
    if content.len() > MAX_UPLOAD_SIZE {
        return Err(bad_request(format!(
            "File too large. Max {}MB",
            MAX_UPLOAD_SIZE / 1024 / 1024
        )));
    }

    let ext = original_name
        .as_deref()
        .and_then(|n| std::path::Path::new(n).extension())
        .and_then(|e| e.to_str())
        .map(|e| format!(".{}", e.to_lowercase()))
        .unwrap_or_else(|| ".png".to_string());
    if !ALLOWED_EXTENSIONS.contains(&ext.as_str()) {
        return Err(bad_request(format!(
            "File type {} not allowed. Use: {}",
            ext,
            ALLOWED_EXTENSIONS.join(", ")
        )));
    }

    let run_dir = state.screenshot_dir.join(run_id.to_string());
    tokio::fs::create_dir_all(&run_dir)
        .await
        .map_err(|e| ApiError(StatusCode::INTERNAL_SERVER_ERROR, format!("Failed to create dir: {}", e)))?;
    let filename = format!("{}/{}{}", run_id, uuid::Uuid::new_v4().simple(), ext);
    let file_size = content.len() as i64;
    tokio::fs::write(state.screenshot_dir.join(&filename), content)
        .await
        .map_err(|e| ApiError(StatusCode::INTERNAL_SERVER_ERROR, format!("Failed to write file: {}", e)))?;

    let screenshot = state.db.insert_screenshot(&NewScreenshot {
        run_id,
        round_id,
        filename,
        original_name,
        caption,
        event_type,
        file_size: Some(file_size),
        width,
        height,
        estimated_score,
        actual_score,
        score_error,
    })?;

    println!("[POST /api/runs/{}/screenshots] Saved {} ({} bytes)", run_id, screenshot.filename, file_size);
    Ok((StatusCode::CREATED, Json(ScreenshotResponse { screenshot })))
}

// DELETE /api/screenshots/:id
async fn delete_screenshot_handler(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<DeletedResponse>, ApiError> {
    let shot = state
        .db
        .get_screenshot(id)?
        .ok_or_else(|| not_found("Screenshot not found"))?;

    let path = state.screenshot_dir.join(&shot.filename);
    if let Err(e) = tokio::fs::remove_file(&path).await {
        if e.kind() != std::io::ErrorKind::NotFound {
            eprintln!("[DELETE /api/screenshots/{}] Failed to remove {}: {}", id, path.display(), e);
        }
    }
    state.db.delete_screenshot(id)?;
    Ok(Json(DeletedResponse { deleted: true }))
}

// ============================================================================
// Stats / catalog handlers
// ============================================================================

// GET /api/stats
async fn stats_handler(State(state): State<AppState>) -> Result<Json<StatsResponse>, ApiError> {
    let stats = state.db.get_stats()?;
    Ok(Json(StatsResponse { stats }))
}

// GET /api/jokers/catalog
async fn joker_catalog_handler(State(state): State<AppState>) -> Response {
    Json(CatalogResponse { jokers: state.catalog.entries() }).into_response()
}

// GET /api/jokers/lookup/:name
async fn joker_lookup_handler(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<Json<JokerInfo>, ApiError> {
    state
        .catalog
        .lookup(&name)
        .cloned()
        .map(Json)
        .ok_or_else(|| not_found(format!("Joker '{}' not found in catalog", name)))
}

// ============================================================================
// Strategy handlers
// ============================================================================

// GET /api/strategies
async fn list_strategies_handler(
    State(state): State<AppState>,
) -> Result<Json<Vec<StrategyStats>>, ApiError> {
    Ok(Json(state.db.list_strategies_with_stats()?))
}

// GET /api/strategies/:id
async fn get_strategy_handler(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<StrategyDetailResponse>, ApiError> {
    let strategy = state
        .db
        .get_strategy(id)?
        .ok_or_else(|| not_found("Strategy not found"))?;
    let runs = state.db.get_runs_for_strategy(id)?;
    Ok(Json(StrategyDetailResponse { strategy, runs }))
}

// POST /api/strategies
async fn create_strategy_handler(
    State(state): State<AppState>,
    Json(req): Json<NewStrategy>,
) -> Result<(StatusCode, Json<StrategyResponse>), ApiError> {
    if let Some(pid) = req.parent_id {
        state
            .db
            .get_strategy(pid)?
            .ok_or_else(|| bad_request(format!("Parent strategy {} not found", pid)))?;
    }
    let strategy = state.db.insert_strategy(&req)?;
    println!(
        "[POST /api/strategies] Registered '{}' (id: {}, hash: {})",
        strategy.name.as_deref().unwrap_or("unnamed"),
        strategy.id,
        strategy.code_hash.as_deref().map(|h| &h[..h.len().min(8)]).unwrap_or("-"),
    );
    Ok((StatusCode::CREATED, Json(StrategyResponse { strategy })))
}

// GET /api/strategies/:id/lineage
async fn strategy_lineage_handler(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<StrategyLineage>, ApiError> {
    let lineage = lineage::resolve(&state.db, id).map_err(ApiError::from)?;
    Ok(Json(lineage))
}

// ============================================================================
// Health
// ============================================================================

// GET /api/health
async fn health_handler(State(state): State<AppState>) -> Result<Json<HealthResponse>, ApiError> {
    state
        .db
        .ping()
        .map_err(|e| ApiError(StatusCode::SERVICE_UNAVAILABLE, e.to_string()))?;
    Ok(Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_secs: state.start_time.elapsed().as_secs(),
    }))
}

// ============================================================================
// Server-rendered pages
// ============================================================================

// GET /
async fn index_page_handler(State(state): State<AppState>) -> Result<Html<String>, ApiError> {
    let runs = state.db.recent_runs(50)?;
    let summaries = score_summaries(&state.db)?;
    let strategies = state.db.list_strategies_with_stats()?;
    let seeds = state.db.list_seeds()?;
    Ok(Html(pages::run_list_page(&runs, &summaries, &strategies, &seeds)))
}

// GET /game/:run_code
async fn game_page_handler(
    State(state): State<AppState>,
    Path(run_code): Path<String>,
) -> Result<Html<String>, ApiError> {
    let detail = aggregate::run_detail_by_code(&state.db, &run_code).map_err(ApiError::from)?;
    Ok(Html(pages::run_detail_page(&detail, &state.catalog)))
}

// GET /strategy/:id
async fn strategy_page_handler(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Html<String>, ApiError> {
    let lineage = lineage::resolve(&state.db, id).map_err(ApiError::from)?;
    let runs = state.db.get_runs_for_strategy(id)?;
    Ok(Html(pages::strategy_page(&lineage, &runs)))
}

// GET /seed/:seed
async fn seed_page_handler(
    State(state): State<AppState>,
    Path(seed): Path<String>,
) -> Result<Html<String>, ApiError> {
    let runs = state.db.get_runs_for_seed(&seed)?;
    if runs.is_empty() {
        return Err(not_found("Seed not found"));
    }
    Ok(Html(pages::seed_page(&seed, &runs)))
}

// ============================================================================
// Auto-backup system
// ============================================================================

fn backup_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".anteroom/backups")
}

fn run_backup(db: &Database, label: &str) {
    let dir = backup_dir();
    if std::fs::create_dir_all(&dir).is_err() {
        eprintln!("[Backup] Failed to create backup directory: {}", dir.display());
        return;
    }
    let now = chrono::Utc::now();
    let filename = format!("{}-{}.db", label, now.format("%Y%m%d-%H%M%S"));
    let path = dir.join(&filename);
    match db.backup_to(&path.to_string_lossy()) {
        Ok(_) => println!("[Backup] {}: {}", label, path.display()),
        Err(e) => eprintln!("[Backup] Failed ({}): {}", label, e),
    }
}

fn prune_backups() {
    let dir = backup_dir();
    let Ok(entries) = std::fs::read_dir(&dir) else { return };

    let mut hourly_files: Vec<(PathBuf, std::time::SystemTime)> = Vec::new();
    for entry in entries.flatten() {
        let path = entry.path();
        let name = path.file_name().and_then(|n| n.to_str()).unwrap_or("");
        if name.starts_with("hourly-") && name.ends_with(".db") {
            if let Ok(meta) = entry.metadata() {
                if let Ok(modified) = meta.modified() {
                    hourly_files.push((path, modified));
                }
            }
        }
    }

    // Keep the last 24 hourly backups
    hourly_files.sort_by(|a, b| b.1.cmp(&a.1));
    for (path, _) in hourly_files.iter().skip(24) {
        std::fs::remove_file(path).ok();
    }
}

async fn backup_loop(db: Arc<Database>) {
    let mut interval = tokio::time::interval(Duration::from_secs(3600));
    loop {
        interval.tick().await;
        run_backup(&db, "hourly");
        prune_backups();
    }
}

// ============================================================================
// Path resolution
// ============================================================================

fn find_database(db_arg: Option<&str>) -> PathBuf {
    if let Some(path) = db_arg {
        return PathBuf::from(path);
    }
    if let Ok(path) = std::env::var("ANTEROOM_DB") {
        if !path.is_empty() {
            return PathBuf::from(path);
        }
    }
    dirs::data_dir()
        .map(|p| p.join("anteroom/runs.db"))
        .unwrap_or_else(|| PathBuf::from("runs.db"))
}

fn find_data_dir(data_arg: Option<&str>) -> PathBuf {
    if let Some(path) = data_arg {
        return PathBuf::from(path);
    }
    if let Ok(path) = std::env::var("ANTEROOM_DATA") {
        if !path.is_empty() {
            return PathBuf::from(path);
        }
    }
    dirs::data_dir()
        .map(|p| p.join("anteroom"))
        .unwrap_or_else(|| PathBuf::from("."))
}

// ============================================================================
// Main
// ============================================================================

#[tokio::main]
async fn main() {
    // Parse simple args (no clap to keep the binary small)
    let args: Vec<String> = std::env::args().collect();
    let mut db_arg: Option<&str> = None;
    let mut bind_arg: Option<&str> = None;
    let mut data_arg: Option<&str> = None;

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--db" if i + 1 < args.len() => {
                db_arg = Some(&args[i + 1]);
                i += 2;
            }
            "--bind" if i + 1 < args.len() => {
                bind_arg = Some(&args[i + 1]);
                i += 2;
            }
            "--data-dir" if i + 1 < args.len() => {
                data_arg = Some(&args[i + 1]);
                i += 2;
            }
            "--help" | "-h" => {
                println!("anteroom-server — run archive HTTP API and viewer");
                println!();
                println!("Usage: anteroom-server [--db PATH] [--bind ADDR:PORT] [--data-dir PATH]");
                println!();
                println!("Environment variables:");
                println!("  ANTEROOM_DB    Database path");
                println!("  ANTEROOM_BIND  Bind address (default: 0.0.0.0:3990)");
                println!("  ANTEROOM_DATA  Data directory for screenshots and the joker catalog");
                std::process::exit(0);
            }
            _ => {
                i += 1;
            }
        }
    }

    let bind_addr = bind_arg
        .map(|s| s.to_string())
        .or_else(|| std::env::var("ANTEROOM_BIND").ok())
        .unwrap_or_else(|| "0.0.0.0:3990".to_string());

    let db_path = find_database(db_arg);
    let data_dir = find_data_dir(data_arg);
    let screenshot_dir = data_dir.join("screenshots");
    let joker_images_dir = data_dir.join("joker-images");
    println!("[Server] Database: {}", db_path.display());
    println!("[Server] Data dir: {}", data_dir.display());
    println!("[Server] Binding to: {}", bind_addr);

    if let Some(parent) = db_path.parent() {
        std::fs::create_dir_all(parent).ok();
    }
    if let Err(e) = std::fs::create_dir_all(&screenshot_dir) {
        eprintln!("[Server] Failed to create screenshot dir: {}", e);
        std::process::exit(1);
    }

    let db = match Database::new(&db_path) {
        Ok(db) => Arc::new(db),
        Err(e) => {
            eprintln!("[Server] Failed to open database: {}", e);
            std::process::exit(1);
        }
    };

    // Catalog loads once; handlers share it by reference
    let catalog = Arc::new(JokerCatalog::load(data_dir.join("jokers.json")));

    // Initial backup, then hourly
    run_backup(&db, "startup");
    tokio::spawn(backup_loop(db.clone()));

    let state = AppState {
        db,
        catalog,
        screenshot_dir: screenshot_dir.clone(),
        start_time: Instant::now(),
    };

    let app = Router::new()
        // JSON API
        .route("/api/runs", get(list_runs_handler).post(create_run_handler))
        .route(
            "/api/runs/{id}",
            get(get_run_handler).patch(patch_run_handler).delete(delete_run_handler),
        )
        .route("/api/runs/by-code/{run_code}", get(get_run_by_code_handler))
        .route("/api/runs/{id}/jokers", post(add_joker_handler))
        .route("/api/runs/{id}/jokers/batch", post(add_jokers_batch_handler))
        .route("/api/runs/{id}/rounds", post(add_round_handler))
        .route("/api/runs/{id}/rounds/batch", post(add_rounds_batch_handler))
        .route("/api/runs/{id}/tags", post(add_tag_handler))
        .route("/api/runs/{id}/screenshots", post(upload_screenshot_handler))
        .route("/api/screenshots/{id}", delete(delete_screenshot_handler))
        .route("/api/stats", get(stats_handler))
        .route("/api/jokers/catalog", get(joker_catalog_handler))
        .route("/api/jokers/lookup/{name}", get(joker_lookup_handler))
        .route("/api/strategies", get(list_strategies_handler).post(create_strategy_handler))
        .route("/api/strategies/{id}", get(get_strategy_handler))
        .route("/api/strategies/{id}/lineage", get(strategy_lineage_handler))
        .route("/api/health", get(health_handler))
        // Server-rendered pages
        .route("/", get(index_page_handler))
        .route("/game/{run_code}", get(game_page_handler))
        .route("/strategy/{id}", get(strategy_page_handler))
        .route("/seed/{seed}", get(seed_page_handler))
        // Static files
        .nest_service("/screenshots", ServeDir::new(screenshot_dir))
        .nest_service("/joker-images", ServeDir::new(joker_images_dir))
        .layer(CorsLayer::permissive())
        .layer(DefaultBodyLimit::max(MAX_UPLOAD_SIZE + 1024 * 1024))
        .with_state(state);

    let listener = match tokio::net::TcpListener::bind(&bind_addr).await {
        Ok(l) => l,
        Err(e) => {
            eprintln!("[Server] Failed to bind to {}: {}", bind_addr, e);
            std::process::exit(1);
        }
    };

    println!("[Server] Listening on {}", bind_addr);
    if let Err(e) = axum::serve(listener, app).await {
        eprintln!("[Server] Server error: {}", e);
        std::process::exit(1);
    }
}
