pub mod cli;
pub mod downloader;
pub mod image_localizer;
pub mod manifest;
pub mod progress;
pub mod renderer;

// Re-export main types for convenience
pub use cli::ExportCommand;
pub use downloader::{
    export_single_page, BulkDownloader, DownloadConfig, FailureKind, FetchOutcome, RunSummary,
};
pub use image_localizer::{
    extension_for, image_digest, localize_images, FetchedImage, HttpImageFetcher, ImageFetcher,
    LocalizeOutcome,
};
pub use manifest::{load_manifest, PageRecord};
pub use progress::{
    default_error_log_path, default_progress_path, ErrorLog, FileErrorLog, FileProgressStore,
    ProgressStore,
};
pub use renderer::{ChromiumRenderer, PageRenderer, RenderError, RenderedPage};
