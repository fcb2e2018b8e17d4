use anyhow::{Context, Result};
use chromiumoxide::browser::{Browser, BrowserConfigBuilder, HeadlessMode};
use chromiumoxide::cdp::browser_protocol::network::{EventResponseReceived, ResourceType};
use chromiumoxide::cdp::browser_protocol::page::SetBypassCspParams;
use chromiumoxide::cdp::browser_protocol::target::{
    CreateBrowserContextParams, CreateTargetParams, DisposeBrowserContextParams,
};
use chromiumoxide::listeners::EventStream;
use chromiumoxide::Page;
use futures::StreamExt;
use std::future::Future;
use std::time::Duration;
use thiserror::Error;
use tokio::task::JoinHandle;
use tokio::time::{timeout, Instant};

/// CSS selector for the primary-content landmark. Waiting for it is
/// best-effort; a timeout is swallowed and capture proceeds with whatever
/// DOM exists.
const LANDMARK_SELECTOR: &str = "article";
const LANDMARK_WAIT: Duration = Duration::from_secs(5);

/// How long to wait for the main document response event before giving up
/// on a status check.
const STATUS_WAIT: Duration = Duration::from_secs(2);

const DOM_POLL_INTERVAL: Duration = Duration::from_millis(100);

#[derive(Debug, Error)]
pub enum RenderError {
    /// The server answered 503: rate-limited or blocked. Kept distinct from
    /// generic navigation failures so logs and output messages can tell the
    /// two apart.
    #[error("rate limited (HTTP 503): {url}")]
    RateLimited { url: String },
    #[error("{0}")]
    Navigation(String),
}

/// Fully rendered page content plus the main document's HTTP status, when
/// the response event was observed in time.
#[derive(Debug, Clone)]
pub struct RenderedPage {
    pub html: String,
    pub status: Option<u16>,
}

/// A headless rendering engine: navigate to a URL and hand back the rendered
/// document. Implementations must refuse content capture for rate-limited
/// (503) responses.
pub trait PageRenderer: Send + Sync {
    fn render<'a>(
        &'a self,
        url: &'a str,
        page_timeout: Duration,
    ) -> impl Future<Output = Result<RenderedPage, RenderError>> + Send + 'a;
}

impl<T: PageRenderer> PageRenderer for std::sync::Arc<T> {
    fn render<'a>(
        &'a self,
        url: &'a str,
        page_timeout: Duration,
    ) -> impl Future<Output = Result<RenderedPage, RenderError>> + Send + 'a {
        self.as_ref().render(url, page_timeout)
    }
}

/// Chromium-backed renderer. One browser process is shared across the whole
/// run; every `render` call gets its own page in its own browser context, so
/// tasks never share cookies or storage.
pub struct ChromiumRenderer {
    browser: Browser,
    handler_task: JoinHandle<()>,
}

impl ChromiumRenderer {
    pub async fn launch() -> Result<Self> {
        let config = BrowserConfigBuilder::default()
            .request_timeout(Duration::from_secs(30))
            .window_size(1280, 720)
            .headless_mode(HeadlessMode::default())
            .arg("--disable-gpu")
            .arg("--disable-dev-shm-usage")
            .arg("--no-sandbox")
            .arg("--disable-setuid-sandbox")
            .build()
            .map_err(|e| anyhow::anyhow!("Failed to build browser config: {e}"))?;

        let (browser, mut handler) = Browser::launch(config)
            .await
            .context("Failed to launch headless browser")?;

        let handler_task = tokio::task::spawn(async move {
            while let Some(event) = handler.next().await {
                if let Err(e) = event {
                    eprintln!("⚠️  Browser handler error: {e}");
                }
            }
        });

        Ok(Self {
            browser,
            handler_task,
        })
    }

    pub async fn shutdown(mut self) -> Result<()> {
        self.browser
            .close()
            .await
            .context("Failed to close browser")?;
        let _ = self.handler_task.await;
        Ok(())
    }

    async fn render_page(
        &self,
        url: &str,
        page_timeout: Duration,
    ) -> Result<RenderedPage, RenderError> {
        // Isolated cookie/storage jar per task. If the browser refuses to
        // create a context, fall back to the shared default context rather
        // than failing the page.
        let context_id = match self
            .browser
            .execute(CreateBrowserContextParams::default())
            .await
        {
            Ok(response) => Some(response.result.browser_context_id.clone()),
            Err(_) => None,
        };

        let mut target = CreateTargetParams::builder().url("about:blank");
        if let Some(id) = context_id.clone() {
            target = target.browser_context_id(id);
        }
        let params = target.build().map_err(RenderError::Navigation)?;

        let page = self
            .browser
            .new_page(params)
            .await
            .map_err(|e| RenderError::Navigation(format!("Failed to open page: {e}")))?;

        // Capture first, then tear the page and its context down on every
        // exit path so browser resources never leak.
        let result = self.capture(&page, url, page_timeout).await;

        let _ = page.close().await;
        if let Some(id) = context_id {
            let _ = self
                .browser
                .execute(DisposeBrowserContextParams::new(id))
                .await;
        }

        result
    }

    async fn capture(
        &self,
        page: &Page,
        url: &str,
        page_timeout: Duration,
    ) -> Result<RenderedPage, RenderError> {
        page.execute(SetBypassCspParams::new(true))
            .await
            .map_err(|e| RenderError::Navigation(format!("Failed to bypass CSP: {e}")))?;

        // Attach the response listener before navigating so the main
        // document event is not missed.
        let mut responses = page
            .event_listener::<EventResponseReceived>()
            .await
            .map_err(|e| RenderError::Navigation(format!("Failed to listen for responses: {e}")))?;

        let deadline = Instant::now() + page_timeout;

        match timeout(page_timeout, page.goto(url)).await {
            Ok(Ok(_)) => {}
            Ok(Err(e)) => {
                return Err(RenderError::Navigation(format!(
                    "Navigation failed for {url}: {e}"
                )))
            }
            Err(_) => {
                return Err(RenderError::Navigation(format!(
                    "Navigation timed out after {}ms for {url}",
                    page_timeout.as_millis()
                )))
            }
        }

        // Wait only until the DOM is constructed, not full network idle.
        wait_for_dom(page, deadline).await?;

        let status = main_document_status(&mut responses, url).await;
        if status == Some(503) {
            return Err(RenderError::RateLimited {
                url: url.to_string(),
            });
        }

        let _ = timeout(LANDMARK_WAIT, async {
            while page.find_element(LANDMARK_SELECTOR).await.is_err() {
                tokio::time::sleep(Duration::from_millis(250)).await;
            }
        })
        .await;

        let html = page
            .content()
            .await
            .map_err(|e| RenderError::Navigation(format!("Failed to read content: {e}")))?;

        Ok(RenderedPage {
            html,
            status: status.map(|s| s as u16),
        })
    }
}

impl PageRenderer for ChromiumRenderer {
    fn render<'a>(
        &'a self,
        url: &'a str,
        page_timeout: Duration,
    ) -> impl Future<Output = Result<RenderedPage, RenderError>> + Send + 'a {
        self.render_page(url, page_timeout)
    }
}

/// Poll `document.readyState` until it leaves `loading` or the deadline
/// passes. This mirrors a DOMContentLoaded wait.
async fn wait_for_dom(page: &Page, deadline: Instant) -> Result<(), RenderError> {
    loop {
        if Instant::now() >= deadline {
            return Err(RenderError::Navigation(
                "Timed out waiting for DOM construction".to_string(),
            ));
        }

        if let Ok(result) = page.evaluate("document.readyState").await {
            if let Ok(state) = result.into_value::<String>() {
                if state != "loading" {
                    return Ok(());
                }
            }
        }

        tokio::time::sleep(DOM_POLL_INTERVAL).await;
    }
}

/// Scan buffered response events for the main document's status. Returns
/// `None` when no matching event shows up in time; the caller then proceeds
/// without a status check.
async fn main_document_status(
    responses: &mut EventStream<EventResponseReceived>,
    url: &str,
) -> Option<i64> {
    timeout(STATUS_WAIT, async {
        while let Some(event) = responses.next().await {
            if is_main_document(&event.r#type, &event.response.url, url) {
                return Some(event.response.status);
            }
        }
        None
    })
    .await
    .unwrap_or(None)
}

/// Whether a response event belongs to the main document. Matches the
/// navigated URL, but also accepts the first document-type response so a
/// redirect chain does not make every page wait out the full status window.
fn is_main_document(resource_type: &ResourceType, response_url: &str, navigated_url: &str) -> bool {
    if response_url.trim_end_matches('/') == navigated_url.trim_end_matches('/') {
        return true;
    }
    *resource_type == ResourceType::Document
}
