use anyhow::Result;
use clap::Parser;
use colored::*;

use page_exporter::cli::ExportCommand;
use page_exporter::downloader::{BulkDownloader, DownloadConfig};
use page_exporter::image_localizer::HttpImageFetcher;
use page_exporter::manifest::load_manifest;
use page_exporter::progress::{
    default_error_log_path, default_progress_path, FileErrorLog, FileProgressStore,
};
use page_exporter::renderer::ChromiumRenderer;

#[tokio::main]
async fn main() -> Result<()> {
    let args = ExportCommand::parse();

    if !args.manifest.is_file() {
        anyhow::bail!("Manifest file not found: {}", args.manifest.display());
    }
    std::fs::create_dir_all("logs")?;
    std::fs::create_dir_all(&args.output_dir)?;

    println!("{}", "Page Exporter Configuration:".bold());
    println!("- Manifest: {}", args.manifest.display());
    println!("- Output directory: {}", args.output_dir.display());
    println!("- Concurrent downloads: {}", args.concurrent_downloads);
    println!("- Batch size: {}", args.batch_size);
    println!("- Page timeout: {} ms", args.page_timeout);

    let records = load_manifest(&args.manifest)?;

    let renderer = ChromiumRenderer::launch().await?;
    let downloader = BulkDownloader::new(
        DownloadConfig {
            output_dir: args.output_dir.clone(),
            concurrent_downloads: args.concurrent_downloads as usize,
            batch_size: args.batch_size as usize,
            page_timeout: args.page_timeout(),
        },
        renderer,
        HttpImageFetcher::new()?,
        Box::new(FileProgressStore::new(default_progress_path())),
        Box::new(FileErrorLog::new(default_error_log_path())),
    );

    let summary = downloader.run(records).await?;

    downloader.into_renderer().shutdown().await?;

    if summary.interrupted {
        std::process::exit(1);
    }

    println!("{}", "✅ Export completed".green());
    Ok(())
}
