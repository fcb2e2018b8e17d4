use anyhow::Result;
use colored::*;
use futures::future::join_all;
use indicatif::{ProgressBar, ProgressStyle};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::Semaphore;
use url::Url;

use crate::image_localizer::{localize_images, HttpImageFetcher, ImageFetcher};
use crate::manifest::PageRecord;
use crate::progress::{ErrorLog, ProgressStore};
use crate::renderer::{ChromiumRenderer, PageRenderer, RenderError};

/// Knobs for one bulk run.
#[derive(Debug, Clone)]
pub struct DownloadConfig {
    pub output_dir: PathBuf,
    /// Global cap on simultaneously active fetch tasks.
    pub concurrent_downloads: usize,
    /// How many tasks are launched together before the scheduler awaits the
    /// whole group and persists the cursor.
    pub batch_size: usize,
    pub page_timeout: Duration,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// HTTP 503 from the main document: rate-limited or blocked.
    RateLimited,
    /// Any other navigation, rendering or write failure.
    Render,
}

/// Terminal state of one page fetch task. Tasks never raise out to the
/// scheduler; every failure is converted into this.
#[derive(Debug)]
pub enum FetchOutcome {
    Saved {
        title: String,
        path: PathBuf,
    },
    Skipped {
        title: String,
        path: PathBuf,
    },
    Failed {
        title: String,
        url: String,
        kind: FailureKind,
        message: String,
    },
}

#[derive(Debug, Error)]
enum FetchError {
    #[error(transparent)]
    Render(#[from] RenderError),
    #[error("Failed to write page: {0}")]
    Write(#[from] std::io::Error),
}

/// Counts for a completed (or interrupted) run.
#[derive(Debug, Default, Clone, Copy)]
pub struct RunSummary {
    pub total: usize,
    pub attempted: usize,
    pub saved: usize,
    pub skipped: usize,
    pub failed: usize,
    pub interrupted: bool,
}

/// Batch scheduler over page fetch tasks.
///
/// Records are processed in manifest order in contiguous batches; all tasks
/// of a batch run concurrently under one run-global admission semaphore, and
/// the progress cursor is persisted after each batch completes.
pub struct BulkDownloader<R: PageRenderer, F: ImageFetcher> {
    config: DownloadConfig,
    renderer: R,
    fetcher: F,
    progress: Box<dyn ProgressStore>,
    errors: Box<dyn ErrorLog>,
    semaphore: Semaphore,
}

impl<R: PageRenderer, F: ImageFetcher> BulkDownloader<R, F> {
    pub fn new(
        config: DownloadConfig,
        renderer: R,
        fetcher: F,
        progress: Box<dyn ProgressStore>,
        errors: Box<dyn ErrorLog>,
    ) -> Self {
        let semaphore = Semaphore::new(config.concurrent_downloads);
        Self {
            config,
            renderer,
            fetcher,
            progress,
            errors,
            semaphore,
        }
    }

    pub fn into_renderer(self) -> R {
        self.renderer
    }

    /// Run the whole manifest. Resumes from the persisted cursor, advancing
    /// it by one batch length after each completed batch. Ctrl-C stops the
    /// run at the next batch boundary without advancing the cursor for the
    /// interrupted batch.
    pub async fn run(&self, records: Vec<PageRecord>) -> Result<RunSummary> {
        let total = records.len();
        let mut summary = RunSummary {
            total,
            ..RunSummary::default()
        };

        if total == 0 {
            println!("No pages found to download.");
            return Ok(summary);
        }
        println!("Found {} pages to download.", total.to_string().cyan());

        let mut cursor = self.progress.read()?.unwrap_or(0) as usize;
        if cursor > 0 {
            println!(
                "Resuming from record {} (persisted progress).",
                cursor.to_string().cyan()
            );
        }
        let remaining: Vec<PageRecord> = records.into_iter().skip(cursor).collect();

        let progress_bar = ProgressBar::new(remaining.len() as u64);
        progress_bar
            .set_style(ProgressStyle::default_bar().template("{bar:40.cyan/blue} {pos}/{len} {msg}")?);

        let ctrl_c = tokio::signal::ctrl_c();
        tokio::pin!(ctrl_c);

        for batch in remaining.chunks(self.config.batch_size) {
            let tasks = batch.iter().map(|record| self.fetch_page(record));

            let results = tokio::select! {
                results = join_all(tasks) => results,
                _ = &mut ctrl_c => {
                    summary.interrupted = true;
                    break;
                }
            };

            cursor += batch.len();
            self.progress.write(cursor as u64)?;
            summary.attempted += batch.len();
            progress_bar.inc(batch.len() as u64);

            for outcome in results {
                match outcome {
                    FetchOutcome::Saved { .. } => summary.saved += 1,
                    FetchOutcome::Skipped { title, .. } => {
                        summary.skipped += 1;
                        println!("⏭️  File already exists, skipped: {title}");
                    }
                    FetchOutcome::Failed {
                        title,
                        url,
                        kind,
                        message,
                    } => {
                        summary.failed += 1;
                        let label = match kind {
                            FailureKind::RateLimited => "Rate limited".yellow(),
                            FailureKind::Render => "Download failed".red(),
                        };
                        eprintln!("{label} {title} ({url}): {message}");
                    }
                }
            }
        }

        if summary.interrupted {
            progress_bar.abandon();
            println!("\n{}", "User interrupted download".yellow());
        } else {
            progress_bar.finish();
            println!(
                "📊 {} saved, {} skipped, {} failed out of {} attempted",
                summary.saved.to_string().green(),
                summary.skipped,
                summary.failed.to_string().red(),
                summary.attempted
            );
        }

        Ok(summary)
    }

    /// One record: `pending → (skip | rendering → status-check → localizing
    /// → writing → done) | failed`. The existence check is the sole
    /// idempotence mechanism; staleness is never considered.
    async fn fetch_page(&self, record: &PageRecord) -> FetchOutcome {
        let save_path = record.save_path(&self.config.output_dir);
        if save_path.exists() {
            return FetchOutcome::Skipped {
                title: record.title.clone(),
                path: save_path,
            };
        }

        let _permit = match self.semaphore.acquire().await {
            Ok(permit) => permit,
            Err(_) => {
                return FetchOutcome::Failed {
                    title: record.title.clone(),
                    url: record.url.clone(),
                    kind: FailureKind::Render,
                    message: "Concurrency gate closed".to_string(),
                }
            }
        };

        match self.fetch_and_save(record, &save_path).await {
            Ok(()) => FetchOutcome::Saved {
                title: record.title.clone(),
                path: save_path,
            },
            Err(e) => {
                let kind = match &e {
                    FetchError::Render(RenderError::RateLimited { .. }) => FailureKind::RateLimited,
                    _ => FailureKind::Render,
                };
                let message = e.to_string();
                if let Err(log_err) = self.errors.append(&record.title, &record.url, &message) {
                    eprintln!("⚠️  Failed to write error log: {log_err}");
                }
                FetchOutcome::Failed {
                    title: record.title.clone(),
                    url: record.url.clone(),
                    kind,
                    message,
                }
            }
        }
    }

    async fn fetch_and_save(&self, record: &PageRecord, save_path: &Path) -> Result<(), FetchError> {
        let rendered = self
            .renderer
            .render(&record.url, self.config.page_timeout)
            .await?;

        let outcome = localize_images(&rendered.html, save_path, &self.fetcher).await;
        if outcome.failed > 0 {
            eprintln!(
                "⚠️  {} of {} images failed for {}",
                outcome.failed,
                outcome.localized + outcome.failed,
                record.url
            );
        }

        if let Some(parent) = save_path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(save_path, outcome.html).await?;

        Ok(())
    }
}

/// Ad-hoc export of one URL without a manifest: a full fetch task for a
/// synthetic record under the `single_pages` category.
pub async fn export_single_page(
    url: &str,
    output_dir: &Path,
    page_timeout: Duration,
) -> Result<PathBuf> {
    let title = title_from_url(url);
    let record = PageRecord::new(url, &title, "single_pages", None);
    let save_path = record.save_path(output_dir);
    if save_path.exists() {
        println!("File already exists, skipped: {}", save_path.display());
        return Ok(save_path);
    }

    let renderer = ChromiumRenderer::launch().await?;
    let fetcher = HttpImageFetcher::new()?;

    let result = async {
        let rendered = renderer
            .render(url, page_timeout)
            .await
            .map_err(|e| anyhow::anyhow!("{e}"))?;
        let outcome = localize_images(&rendered.html, &save_path, &fetcher).await;
        if let Some(parent) = save_path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&save_path, outcome.html).await?;
        Ok::<_, anyhow::Error>(())
    }
    .await;

    renderer.shutdown().await?;
    result?;

    println!("✅ Saved: {}", save_path.display());
    Ok(save_path)
}

/// Last non-empty path segment of the URL, falling back to the host, as a
/// human-readable title.
fn title_from_url(url: &str) -> String {
    if let Ok(parsed) = Url::parse(url) {
        if let Some(segment) = parsed
            .path_segments()
            .and_then(|segments| segments.filter(|s| !s.is_empty()).last())
        {
            return segment.to_string();
        }
        if let Some(host) = parsed.host_str() {
            return host.to_string();
        }
    }
    "page".to_string()
}
