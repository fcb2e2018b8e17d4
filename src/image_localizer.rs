use anyhow::{Context, Result};
use reqwest::{Client, ClientBuilder};
use select::document::Document;
use select::predicate::Name;
use std::collections::HashSet;
use std::future::Future;
use std::path::Path;
use std::time::Duration;
use url::Url;
use xxhash_rust::xxh3::xxh3_64;

/// One attempt per image per page visit; no retry policy.
const IMAGE_FETCH_TIMEOUT: Duration = Duration::from_secs(10);

const IMAGES_SUBDIR: &str = "images";

/// Raw bytes of a fetched image together with the response content type,
/// used as an extension fallback when the URL path has none.
#[derive(Debug, Clone)]
pub struct FetchedImage {
    pub bytes: Vec<u8>,
    pub content_type: Option<String>,
}

/// HTTP collaborator that retrieves image bytes. A trait seam so tests can
/// substitute a canned fetcher.
pub trait ImageFetcher: Send + Sync {
    fn fetch<'a>(&'a self, url: &'a str) -> impl Future<Output = Result<FetchedImage>> + Send + 'a;
}

pub struct HttpImageFetcher {
    client: Client,
}

impl HttpImageFetcher {
    pub fn new() -> Result<Self> {
        let client = ClientBuilder::new()
            .use_rustls_tls()
            .user_agent("PageExporter/1.0")
            .timeout(IMAGE_FETCH_TIMEOUT)
            .build()
            .context("Failed to build image HTTP client")?;

        Ok(Self { client })
    }
}

impl ImageFetcher for HttpImageFetcher {
    fn fetch<'a>(&'a self, url: &'a str) -> impl Future<Output = Result<FetchedImage>> + Send + 'a {
        async move {
            let response = self
                .client
                .get(url)
                .send()
                .await
                .with_context(|| format!("Request failed for image {url}"))?;

            if !response.status().is_success() {
                anyhow::bail!("HTTP {} for image {url}", response.status());
            }

            let content_type = response
                .headers()
                .get("content-type")
                .and_then(|v| v.to_str().ok())
                .map(str::to_string);

            let bytes = response
                .bytes()
                .await
                .with_context(|| format!("Failed to read image body for {url}"))?;

            Ok(FetchedImage {
                bytes: bytes.to_vec(),
                content_type,
            })
        }
    }
}

/// Result of localizing one page's images.
#[derive(Debug)]
pub struct LocalizeOutcome {
    pub html: String,
    pub localized: usize,
    pub failed: usize,
}

/// Rewrite every `<img>` whose `src` is an absolute HTTP(S) URL to a local
/// copy under `{page_dir}/images/{digest}.{ext}`, downloading each image
/// once per distinct source URL.
///
/// Non-HTTP sources (data URIs, relative paths, missing src) are left
/// untouched, so markup without absolute images comes back byte-identical.
/// A failed fetch is non-fatal: the element keeps its original source and
/// the remaining images are still processed.
pub async fn localize_images<F: ImageFetcher>(
    html: &str,
    page_path: &Path,
    fetcher: &F,
) -> LocalizeOutcome {
    let document = Document::from(html);
    let mut sources = Vec::new();
    let mut seen = HashSet::new();

    for node in document.find(Name("img")) {
        if let Some(src) = node.attr("src") {
            if (src.starts_with("http://") || src.starts_with("https://"))
                && seen.insert(src.to_string())
            {
                sources.push(src.to_string());
            }
        }
    }

    let page_dir = page_path.parent().unwrap_or_else(|| Path::new("."));
    let images_dir = page_dir.join(IMAGES_SUBDIR);

    let mut html = html.to_string();
    let mut localized = 0;
    let mut failed = 0;

    for src in sources {
        let image = match fetcher.fetch(&src).await {
            Ok(image) => image,
            Err(e) => {
                eprintln!("⚠️  Failed to fetch image {src}: {e}");
                failed += 1;
                continue;
            }
        };

        let filename = format!(
            "{}.{}",
            image_digest(&src),
            extension_for(&src, image.content_type.as_deref())
        );

        if let Err(e) = write_image(&images_dir, &filename, &image.bytes).await {
            eprintln!("⚠️  Failed to store image {src}: {e}");
            failed += 1;
            continue;
        }

        // The parsed attribute value is entity-decoded, so a query-bearing
        // URL may appear in the raw markup with `&` written as `&amp;`. Try
        // both spellings and only count the image once a reference was
        // actually rewritten.
        let local = format!("src=\"{IMAGES_SUBDIR}/{filename}\"");
        let mut replaced = false;
        for needle in source_spellings(&src) {
            let needle = format!("src=\"{needle}\"");
            if html.contains(&needle) {
                html = html.replace(&needle, &local);
                replaced = true;
            }
        }

        if replaced {
            localized += 1;
        } else {
            eprintln!("⚠️  Could not rewrite references to image {src}");
            failed += 1;
        }
    }

    LocalizeOutcome {
        html,
        localized,
        failed,
    }
}

/// The raw-markup spellings a decoded `src` value may have: the value
/// itself, plus the `&amp;`-encoded form when it contains ampersands.
fn source_spellings(src: &str) -> Vec<String> {
    let mut spellings = vec![src.to_string()];
    if src.contains('&') {
        spellings.push(src.replace('&', "&amp;"));
    }
    spellings
}

async fn write_image(images_dir: &Path, filename: &str, bytes: &[u8]) -> Result<()> {
    tokio::fs::create_dir_all(images_dir)
        .await
        .with_context(|| format!("Failed to create {}", images_dir.display()))?;
    let target = images_dir.join(filename);
    tokio::fs::write(&target, bytes)
        .await
        .with_context(|| format!("Failed to write {}", target.display()))?;
    Ok(())
}

/// Fixed-length digest of the source URL string, used as a stable local
/// filename. Collisions between distinct URLs truncating to the same digest
/// are accepted and not verified.
pub fn image_digest(url: &str) -> String {
    let mut hex = format!("{:016x}", xxh3_64(url.as_bytes()));
    hex.truncate(10);
    hex
}

/// Short extension derived from the URL path, falling back to the response
/// content type, then to a generic `img`.
pub fn extension_for(url: &str, content_type: Option<&str>) -> String {
    if let Ok(parsed) = Url::parse(url) {
        if let Some(ext) = Path::new(parsed.path()).extension().and_then(|e| e.to_str()) {
            if !ext.is_empty() && ext.len() <= 5 && ext.chars().all(|c| c.is_ascii_alphanumeric()) {
                return ext.to_ascii_lowercase();
            }
        }
    }

    if let Some(content_type) = content_type {
        let essence = content_type
            .split(';')
            .next()
            .unwrap_or(content_type)
            .trim();
        if let Some(extensions) = mime_guess::get_mime_extensions_str(essence) {
            if let Some(ext) = extensions.first() {
                return (*ext).to_string();
            }
        }
    }

    "img".to_string()
}
