#![forbid(unsafe_code)]

//! Small Axum app for the sampler: pick a channel, look at ten random
//! catalog URLs and download them into the local folder.
//!
//! Everything that talks to the catalog or yt-dlp is blocking, so handlers
//! hop onto `spawn_blocking` for that work.

use std::{
    collections::HashMap,
    net::{IpAddr, SocketAddr},
    path::PathBuf,
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
};

use anyhow::{Context, Result};
use axum::{
    Json, Router,
    extract::{Path as AxumPath, Query, State},
    http::StatusCode,
    response::{Html, IntoResponse, Response},
    routing::{get, post},
};
use clap::Parser;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::signal;
use tracing::{error, info};
use tube_catalog::{
    CatalogError,
    catalog::{CatalogStore, SheetsCatalog},
    channels::ChannelTable,
    config::{SettingsOverrides, resolve_settings},
    init_tracing,
    platform::{VideoPlatform, YtDlp, is_web_url},
    sampler::{DownloadProgress, FailedDownload, download_all, prepare_download_dir, sample_channel},
    security::{check_credentials_file, ensure_not_root},
};

const INDEX_HTML: &str = include_str!("../../assets/index.html");

#[derive(Debug, Parser)]
#[command(name = "sampler", about = "Pick random catalog videos and download them")]
struct SamplerArgs {
    /// dotenv file holding SHEET_ID, SHEET_NAME and SERVICE_ACCOUNT_FILE
    #[arg(long, value_name = "PATH")]
    env_file: Option<PathBuf>,

    /// Channel table providing the dropdown labels
    #[arg(long, value_name = "PATH")]
    channels: Option<PathBuf>,

    /// Address to listen on (defaults to SAMPLER_HOST or 127.0.0.1)
    #[arg(long)]
    host: Option<String>,

    /// Port to listen on (defaults to SAMPLER_PORT or 8501)
    #[arg(long)]
    port: Option<u16>,

    /// Folder that receives downloaded files (defaults to DOWNLOAD_DIR)
    #[arg(long, value_name = "PATH")]
    download_dir: Option<PathBuf>,
}

impl SamplerArgs {
    fn overrides(&self) -> SettingsOverrides {
        SettingsOverrides {
            env_path: self.env_file.clone(),
            download_dir: self.download_dir.clone(),
            sampler_host: self.host.clone(),
            sampler_port: self.port,
        }
    }
}

fn parse_host(value: &str) -> Result<IpAddr> {
    value
        .trim()
        .parse::<IpAddr>()
        .context("expected a valid IPv4 or IPv6 address for --host/SAMPLER_HOST")
}

#[derive(Clone)]
struct DownloadManager {
    inner: Arc<DownloadManagerInner>,
}

struct DownloadManagerInner {
    jobs: Mutex<HashMap<String, DownloadJob>>,
    /// Id of the batch currently downloading, if any.
    active: Mutex<Option<String>>,
    counter: AtomicUsize,
    platform: Arc<dyn VideoPlatform>,
    download_dir: PathBuf,
}

#[derive(Clone)]
struct DownloadJob {
    id: String,
    status: DownloadStatus,
    total: usize,
    completed: usize,
    current: Option<String>,
    /// Every URL picked up so far, in batch order.
    started: Vec<String>,
    failures: Vec<FailedDownload>,
    message: String,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum DownloadStatus {
    Queued,
    Running,
    Completed,
    Failed,
}

impl DownloadStatus {
    fn as_str(self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct DownloadJobResponse {
    id: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct DownloadJobStatus {
    id: String,
    status: String,
    total: usize,
    completed: usize,
    progress: u8,
    current: Option<String>,
    started: Vec<String>,
    message: String,
    failures: Vec<FailedDownload>,
    download_dir: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StartDownloadRequest {
    urls: Vec<String>,
}

#[derive(Debug)]
enum StartError {
    NothingToDownload,
    NotAUrl(String),
    Busy(String),
}

impl DownloadManager {
    fn new(platform: Arc<dyn VideoPlatform>, download_dir: PathBuf) -> Self {
        Self {
            inner: Arc::new(DownloadManagerInner {
                jobs: Mutex::new(HashMap::new()),
                active: Mutex::new(None),
                counter: AtomicUsize::new(1),
                platform,
                download_dir,
            }),
        }
    }

    /// Queues a batch and runs it in the background. Only one batch runs at a
    /// time.
    fn start(&self, urls: Vec<String>) -> Result<String, StartError> {
        let urls: Vec<String> = urls
            .into_iter()
            .map(|url| url.trim().to_string())
            .filter(|url| !url.is_empty())
            .collect();
        if urls.is_empty() {
            return Err(StartError::NothingToDownload);
        }
        if let Some(bad) = urls.iter().find(|url| !is_web_url(url)) {
            return Err(StartError::NotAUrl(bad.clone()));
        }

        let job_id = {
            let mut active = self.inner.active.lock();
            if let Some(running) = active.as_ref() {
                return Err(StartError::Busy(running.clone()));
            }
            let job_id = self.next_job_id();
            *active = Some(job_id.clone());
            job_id
        };

        self.inner.jobs.lock().insert(
            job_id.clone(),
            DownloadJob {
                id: job_id.clone(),
                status: DownloadStatus::Queued,
                total: urls.len(),
                completed: 0,
                current: None,
                started: Vec::new(),
                failures: Vec::new(),
                message: "Queued".to_string(),
            },
        );

        let inner = self.inner.clone();
        let job_id_clone = job_id.clone();
        tokio::spawn(async move {
            update_job(&inner, &job_id_clone, |job| {
                job.status = DownloadStatus::Running;
                job.message = "Running".to_string();
            });
            let inner_for_run = inner.clone();
            let id_for_run = job_id_clone.clone();
            let outcome = tokio::task::spawn_blocking(move || {
                let mut progress = JobProgress {
                    inner: inner_for_run.clone(),
                    job_id: id_for_run,
                };
                download_all(
                    inner_for_run.platform.as_ref(),
                    &urls,
                    &inner_for_run.download_dir,
                    &mut progress,
                )
            })
            .await;

            match outcome {
                Ok(report) => update_job(&inner, &job_id_clone, |job| {
                    job.status = DownloadStatus::Completed;
                    job.current = None;
                    job.message = format!(
                        "{} of {} downloads succeeded",
                        report.succeeded(),
                        report.total
                    );
                }),
                Err(err) => {
                    error!("download batch {job_id_clone} aborted: {err}");
                    update_job(&inner, &job_id_clone, |job| {
                        job.status = DownloadStatus::Failed;
                        job.current = None;
                        job.message = format!("Failed: {err}");
                    });
                }
            }
            inner.active.lock().take();
        });

        Ok(job_id)
    }

    fn get_status(&self, job_id: &str) -> Option<DownloadJobStatus> {
        let job = self.inner.jobs.lock().get(job_id).cloned()?;
        let progress = if job.total == 0 {
            0
        } else {
            (job.completed * 100 / job.total) as u8
        };
        Some(DownloadJobStatus {
            id: job.id,
            status: job.status.as_str().to_string(),
            total: job.total,
            completed: job.completed,
            progress,
            current: job.current,
            started: job.started,
            message: job.message,
            failures: job.failures,
            download_dir: self.inner.download_dir.display().to_string(),
        })
    }

    fn next_job_id(&self) -> String {
        let id = self.inner.counter.fetch_add(1, Ordering::Relaxed);
        format!("download-{id}")
    }
}

fn update_job(inner: &DownloadManagerInner, job_id: &str, apply: impl FnOnce(&mut DownloadJob)) {
    if let Some(job) = inner.jobs.lock().get_mut(job_id) {
        apply(job);
    }
}

/// Mirrors batch progress into the job table so pollers can see it.
struct JobProgress {
    inner: Arc<DownloadManagerInner>,
    job_id: String,
}

impl DownloadProgress for JobProgress {
    fn item_started(&mut self, _index: usize, _total: usize, url: &str) {
        update_job(&self.inner, &self.job_id, |job| {
            job.current = Some(url.to_string());
            job.started.push(url.to_string());
        });
    }

    fn item_failed(&mut self, index: usize, url: &str, error: &CatalogError) {
        update_job(&self.inner, &self.job_id, |job| {
            job.failures.push(FailedDownload {
                index,
                url: url.to_string(),
                error: error.to_string(),
            });
        });
    }

    fn item_finished(&mut self, completed: usize, _total: usize) {
        update_job(&self.inner, &self.job_id, |job| {
            job.completed = completed;
        });
    }
}

/// Shared state injected into every handler.
#[derive(Clone)]
struct AppState {
    store: Arc<dyn CatalogStore>,
    labels: Arc<Vec<String>>,
    downloads: DownloadManager,
}

#[derive(Debug)]
struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    fn bad_request(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            message: message.into(),
        }
    }

    fn not_found(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::NOT_FOUND,
            message: message.into(),
        }
    }

    fn conflict(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::CONFLICT,
            message: message.into(),
        }
    }

    fn internal(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            message: message.into(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = serde_json::json!({
            "error": self.message,
        });
        (self.status, Json(body)).into_response()
    }
}

type ApiResult<T> = Result<T, ApiError>;

#[tokio::main]
async fn main() -> Result<()> {
    let args = SamplerArgs::parse();
    init_tracing();
    ensure_not_root("sampler")?;

    let settings = resolve_settings(args.overrides())?;
    let table = ChannelTable::load_or_builtin(args.channels.as_deref())?;

    let ytdlp = YtDlp::new(&settings.yt_dlp_path);
    ytdlp.ensure_available()?;
    let download_dir = prepare_download_dir(&settings.download_dir)?;

    let target = settings.sheet_target()?;
    check_credentials_file(target.service_account_file);
    let catalog = SheetsCatalog::open_or_create(&target).context("opening catalog worksheet")?;
    info!("sampling from worksheet {}", catalog.sheet_name());

    let state = AppState {
        store: Arc::new(catalog),
        labels: Arc::new(table.sampler_labels),
        downloads: DownloadManager::new(Arc::new(ytdlp), download_dir.clone()),
    };
    let app = router(state);

    let addr = SocketAddr::new(parse_host(&settings.sampler_host)?, settings.sampler_port);
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("binding to {addr}"))?;
    println!("Sampler listening on http://{addr}");
    println!("Downloads go to {}", download_dir.display());

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("running sampler server")?;

    Ok(())
}

fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(index))
        .route("/api/channels", get(list_channels))
        .route("/api/sample", get(sample))
        .route("/api/downloads", post(start_download))
        .route("/api/downloads/{id}", get(get_download_status))
        .with_state(state)
}

async fn shutdown_signal() {
    if let Err(err) = signal::ctrl_c().await {
        eprintln!("Failed to install Ctrl+C handler: {err}");
    }
}

async fn index() -> Html<&'static str> {
    Html(INDEX_HTML)
}

async fn list_channels(State(state): State<AppState>) -> Json<Vec<String>> {
    Json(state.labels.as_ref().clone())
}

#[derive(Debug, Deserialize)]
struct SampleQuery {
    channel: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SampleResponse {
    channel: String,
    urls: Vec<String>,
    warning: Option<String>,
}

async fn sample(
    State(state): State<AppState>,
    Query(query): Query<SampleQuery>,
) -> ApiResult<Json<SampleResponse>> {
    if !state.labels.iter().any(|label| *label == query.channel) {
        return Err(ApiError::not_found(format!(
            "unknown channel: {}",
            query.channel
        )));
    }

    let store = state.store.clone();
    let label = query.channel;
    let sample = tokio::task::spawn_blocking(move || {
        sample_channel(store.as_ref(), &label, &mut rand::thread_rng())
    })
    .await
    .map_err(|err| ApiError::internal(err.to_string()))?
    .map_err(|err| ApiError::internal(format!("{err:#}")))?;

    let warning = sample.warning();
    Ok(Json(SampleResponse {
        channel: sample.channel,
        urls: sample.urls,
        warning,
    }))
}

async fn start_download(
    State(state): State<AppState>,
    Json(payload): Json<StartDownloadRequest>,
) -> ApiResult<Json<DownloadJobResponse>> {
    match state.downloads.start(payload.urls) {
        Ok(id) => Ok(Json(DownloadJobResponse { id })),
        Err(StartError::NothingToDownload) => Err(ApiError::bad_request(
            "There are no video links to download. Pick a channel first.",
        )),
        Err(StartError::NotAUrl(entry)) => Err(ApiError::bad_request(format!(
            "not a video link: {entry}"
        ))),
        Err(StartError::Busy(running)) => Err(ApiError::conflict(format!(
            "download {running} is still running"
        ))),
    }
}

async fn get_download_status(
    State(state): State<AppState>,
    AxumPath(id): AxumPath<String>,
) -> ApiResult<Json<DownloadJobStatus>> {
    let status = state
        .downloads
        .get_status(&id)
        .ok_or_else(|| ApiError::not_found("download not found"))?;
    Ok(Json(status))
}
