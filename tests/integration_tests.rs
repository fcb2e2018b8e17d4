use page_exporter::{
    extension_for, image_digest, load_manifest, localize_images, ErrorLog, FetchedImage,
    FileErrorLog, FileProgressStore, ImageFetcher, PageRecord, ProgressStore,
};
use std::collections::HashMap;
use std::fs;
use std::future::Future;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use tempfile::tempdir;

fn write_manifest(dir: &Path, contents: &str) -> std::path::PathBuf {
    let path = dir.join("posts.csv");
    fs::write(&path, contents).unwrap();
    path
}

#[test]
fn test_load_manifest_preserves_row_order() {
    let dir = tempdir().unwrap();
    let path = write_manifest(
        dir.path(),
        "url,title,category,subcategory\n\
         https://example.com/1,First,guides,rust\n\
         https://example.com/2,Second,guides,\n\
         https://example.com/3,Third,news,go\n",
    );

    let records = load_manifest(&path).unwrap();

    assert_eq!(records.len(), 3);
    assert_eq!(records[0].title, "First");
    assert_eq!(records[0].subcategory.as_deref(), Some("rust"));
    assert_eq!(records[1].title, "Second");
    assert_eq!(records[1].subcategory, None);
    assert_eq!(records[2].url, "https://example.com/3");
}

#[test]
fn test_load_manifest_without_subcategory_column() {
    let dir = tempdir().unwrap();
    let path = write_manifest(
        dir.path(),
        "url,title,category\nhttps://example.com/1,First,guides\n",
    );

    let records = load_manifest(&path).unwrap();

    assert_eq!(records.len(), 1);
    assert_eq!(records[0].subcategory, None);
}

#[test]
fn test_load_manifest_missing_file_is_fatal() {
    let dir = tempdir().unwrap();
    assert!(load_manifest(&dir.path().join("missing.csv")).is_err());
}

#[test]
fn test_load_manifest_missing_required_column_is_fatal() {
    let dir = tempdir().unwrap();
    let path = write_manifest(dir.path(), "url,category\nhttps://example.com/1,guides\n");

    assert!(load_manifest(&path).is_err());
}

#[test]
fn test_save_path_hierarchy() {
    let record = PageRecord::new("https://example.com/p", "My: Post?", "guides", Some("rust"));
    let path = record.save_path(Path::new("/out"));
    assert_eq!(path, Path::new("/out/guides/rust/My_ Post_.html"));
}

#[test]
fn test_progress_store_resume_roundtrip() {
    let dir = tempdir().unwrap();
    let store = FileProgressStore::new(dir.path().join("logs/download_progress.txt"));

    assert_eq!(store.read().unwrap(), None);
    store.write(5).unwrap();
    store.write(10).unwrap();
    assert_eq!(store.read().unwrap(), Some(10));

    // A fresh store against the same file sees the persisted cursor.
    let reopened = FileProgressStore::new(dir.path().join("logs/download_progress.txt"));
    assert_eq!(reopened.read().unwrap(), Some(10));
}

#[test]
fn test_error_log_format() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("error_log.txt");
    let log = FileErrorLog::new(&path);
    log.append("A Page", "https://example.com/a", "navigation timed out")
        .unwrap();

    let contents = fs::read_to_string(&path).unwrap();
    assert!(contents.contains("A Page (https://example.com/a): navigation timed out"));
}

/// Canned fetcher used in place of real HTTP.
struct StubFetcher {
    responses: HashMap<String, FetchedImage>,
    calls: AtomicUsize,
}

impl StubFetcher {
    fn new(responses: HashMap<String, FetchedImage>) -> Self {
        Self {
            responses,
            calls: AtomicUsize::new(0),
        }
    }
}

impl ImageFetcher for StubFetcher {
    fn fetch<'a>(
        &'a self,
        url: &'a str,
    ) -> impl Future<Output = anyhow::Result<FetchedImage>> + Send + 'a {
        async move {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.responses
                .get(url)
                .cloned()
                .ok_or_else(|| anyhow::anyhow!("HTTP 404 for image {url}"))
        }
    }
}

#[tokio::test]
async fn test_localize_rewrites_absolute_image_to_hashed_local_path() {
    let dir = tempdir().unwrap();
    let page_path = dir.path().join("guides/post.html");

    let src = "https://cdn.example.com/photo.png";
    let html = format!(r#"<html><body><img src="{src}" alt="x"></body></html>"#);
    let fetcher = StubFetcher::new(HashMap::from([(
        src.to_string(),
        FetchedImage {
            bytes: vec![0x89, 0x50, 0x4e, 0x47],
            content_type: Some("image/png".to_string()),
        },
    )]));

    let outcome = localize_images(&html, &page_path, &fetcher).await;

    assert_eq!(outcome.localized, 1);
    assert_eq!(outcome.failed, 0);

    let expected = format!("images/{}.png", image_digest(src));
    assert!(outcome.html.contains(&format!(r#"src="{expected}""#)));
    assert!(!outcome.html.contains(src));

    let stored = dir.path().join("guides").join(&expected);
    assert!(stored.is_file());
    assert!(!fs::read(&stored).unwrap().is_empty());
}

#[tokio::test]
async fn test_localize_leaves_relative_and_data_uri_sources_untouched() {
    let dir = tempdir().unwrap();
    let page_path = dir.path().join("post.html");

    let html = concat!(
        "<html><body>",
        r#"<img src="images/local.png">"#,
        r#"<img src="data:image/gif;base64,R0lGOD=="#,
        r#""><img src="/rooted.jpg"></body></html>"#,
    );
    let fetcher = StubFetcher::new(HashMap::new());

    let outcome = localize_images(html, &page_path, &fetcher).await;

    assert_eq!(outcome.html, html);
    assert_eq!(outcome.localized, 0);
    assert_eq!(outcome.failed, 0);
    assert_eq!(fetcher.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_localize_fetch_failure_is_non_fatal() {
    let dir = tempdir().unwrap();
    let page_path = dir.path().join("post.html");

    let good = "https://cdn.example.com/good.jpg";
    let bad = "https://cdn.example.com/bad.jpg";
    let html = format!(r#"<html><body><img src="{bad}"><img src="{good}"></body></html>"#);
    let fetcher = StubFetcher::new(HashMap::from([(
        good.to_string(),
        FetchedImage {
            bytes: vec![1, 2, 3],
            content_type: Some("image/jpeg".to_string()),
        },
    )]));

    let outcome = localize_images(&html, &page_path, &fetcher).await;

    assert_eq!(outcome.localized, 1);
    assert_eq!(outcome.failed, 1);
    // The failed element keeps its original source.
    assert!(outcome.html.contains(&format!(r#"src="{bad}""#)));
    assert!(!outcome.html.contains(&format!(r#"src="{good}""#)));
}

#[tokio::test]
async fn test_localize_rewrites_entity_encoded_query_source() {
    let dir = tempdir().unwrap();
    let page_path = dir.path().join("post.html");

    // The attribute value parses to the decoded URL, but the raw markup
    // spells the ampersand as an entity.
    let src = "https://cdn.example.com/pic.png?a=1&b=2";
    let html = r#"<html><body><img src="https://cdn.example.com/pic.png?a=1&amp;b=2"></body></html>"#;
    let fetcher = StubFetcher::new(HashMap::from([(
        src.to_string(),
        FetchedImage {
            bytes: vec![7, 7, 7],
            content_type: Some("image/png".to_string()),
        },
    )]));

    let outcome = localize_images(html, &page_path, &fetcher).await;

    assert_eq!(outcome.localized, 1);
    assert_eq!(outcome.failed, 0);

    let expected = format!("images/{}.png", image_digest(src));
    assert!(outcome.html.contains(&format!(r#"src="{expected}""#)));
    assert!(!outcome.html.contains("cdn.example.com"));
}

#[tokio::test]
async fn test_localize_counts_unrewritable_source_as_failed() {
    let dir = tempdir().unwrap();
    let page_path = dir.path().join("post.html");

    // A source the scanner sees but whose raw spelling matches neither the
    // decoded nor the entity-encoded form must not count as localized.
    let src = "https://cdn.example.com/odd.png?x=<y>";
    let html = r#"<html><body><img src="https://cdn.example.com/odd.png?x=&lt;y&gt;"></body></html>"#;
    let fetcher = StubFetcher::new(HashMap::from([(
        src.to_string(),
        FetchedImage {
            bytes: vec![1],
            content_type: Some("image/png".to_string()),
        },
    )]));

    let outcome = localize_images(html, &page_path, &fetcher).await;

    assert_eq!(outcome.localized, 0);
    assert_eq!(outcome.failed, 1);
    assert_eq!(outcome.html, html);
}

#[tokio::test]
async fn test_localize_fetches_duplicate_sources_once() {
    let dir = tempdir().unwrap();
    let page_path = dir.path().join("post.html");

    let src = "https://cdn.example.com/logo.png";
    let html = format!(r#"<html><body><img src="{src}"><img src="{src}"></body></html>"#);
    let fetcher = StubFetcher::new(HashMap::from([(
        src.to_string(),
        FetchedImage {
            bytes: vec![9],
            content_type: Some("image/png".to_string()),
        },
    )]));

    let outcome = localize_images(&html, &page_path, &fetcher).await;

    assert_eq!(fetcher.calls.load(Ordering::SeqCst), 1);
    // Both elements are rewritten to the same local copy.
    let expected = format!("images/{}.png", image_digest(src));
    assert_eq!(outcome.html.matches(&expected).count(), 2);
}

#[test]
fn test_extension_best_effort_for_query_bearing_url() {
    assert_eq!(
        extension_for("https://cdn.example.com/img.webp?w=640&q=75", None),
        "webp"
    );
}
