use clap::Parser;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Parser, Debug)]
#[command(
    name = "page-exporter",
    about = "Bulk webpage downloader",
    version,
    long_about = "Downloads every webpage listed in a CSV manifest, rendering each with headless \
                  Chromium, rewriting embedded images to local copies and saving the result as a \
                  standalone HTML file. Progress is persisted per batch so interrupted runs resume."
)]
pub struct ExportCommand {
    /// CSV manifest with url,title,category[,subcategory] columns
    #[arg(short, long, default_value = "data/posts.csv")]
    pub manifest: PathBuf,

    /// Directory to save downloaded files
    #[arg(short, long, default_value = "outputs")]
    pub output_dir: PathBuf,

    /// Number of concurrent downloads
    #[arg(short, long, default_value_t = 5, value_parser = clap::value_parser!(u64).range(1..))]
    pub concurrent_downloads: u64,

    /// Number of pages to process per batch
    #[arg(short, long, default_value_t = 5, value_parser = clap::value_parser!(u64).range(1..))]
    pub batch_size: u64,

    /// Page load timeout (milliseconds)
    #[arg(short, long, default_value_t = 50_000, value_parser = clap::value_parser!(u64).range(1000..))]
    pub page_timeout: u64,
}

impl ExportCommand {
    pub fn page_timeout(&self) -> Duration {
        Duration::from_millis(self.page_timeout)
    }
}
