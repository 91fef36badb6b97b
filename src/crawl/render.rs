//! Page renderers applied to HTML documents before link extraction.

use async_trait::async_trait;
use url::Url;

use crate::error::Result;

/// Turns a fetched HTML document into the markup that gets saved.
#[async_trait]
pub trait PageRenderer: Send + Sync {
    /// Renders the page at `url`. `fetched` is the body the crawler already
    /// downloaded.
    async fn render(&self, url: &Url, fetched: String) -> Result<String>;
}

/// Saves pages exactly as served.
#[derive(Debug, Clone, Copy, Default)]
pub struct PassthroughRenderer;

#[async_trait]
impl PageRenderer for PassthroughRenderer {
    async fn render(&self, _url: &Url, fetched: String) -> Result<String> {
        Ok(fetched)
    }
}

/// Awaits `close` whatever `result` holds. A failed close only replaces a
/// successful result.
#[cfg(any(feature = "headless", test))]
async fn then_close<T, E>(
    result: Result<T>,
    close: impl std::future::Future<Output = std::result::Result<(), E>>,
) -> Result<T>
where
    E: Into<crate::error::Error>,
{
    match (result, close.await) {
        (Ok(_), Err(e)) => Err(e.into()),
        (Err(e), Err(close_error)) => {
            let close_error: crate::error::Error = close_error.into();
            log::debug!("Closing page after failure also failed: {close_error}");
            Err(e)
        }
        (result, Ok(())) => result,
    }
}

#[cfg(feature = "headless")]
pub use headless::HeadlessRenderer;

#[cfg(feature = "headless")]
mod headless {
    use std::time::Duration;

    use async_trait::async_trait;
    use chromiumoxide::Page;
    use chromiumoxide::browser::{Browser, BrowserConfig};
    use futures::StreamExt;
    use tokio::sync::Mutex;
    use url::Url;

    use super::{PageRenderer, then_close};
    use crate::config::HeadlessConfig;
    use crate::error::{Error, Result};

    const SCROLL_STEP: &str = "(() => { window.scrollBy(0, window.innerHeight); \
        return window.innerHeight + window.scrollY >= document.body.scrollHeight; })()";

    const BLOCK_NAVIGATION: &str = "(() => { window.open = () => null; \
        window.addEventListener('beforeunload', (e) => { e.preventDefault(); e.returnValue = ''; }); \
        return true; })()";

    /// Renders pages in headless Chromium, scrolling to the bottom so lazily
    /// loaded content ends up in the saved markup.
    ///
    /// The browser is launched on first use and shared by all sessions.
    pub struct HeadlessRenderer {
        config: HeadlessConfig,
        user_agent: String,
        request_timeout: Duration,
        browser: Mutex<Option<Browser>>,
    }

    impl HeadlessRenderer {
        /// Creates a renderer; no browser is started until the first page.
        #[must_use]
        pub fn new(config: HeadlessConfig, user_agent: String, request_timeout: Duration) -> Self {
            Self {
                config,
                user_agent,
                request_timeout,
                browser: Mutex::new(None),
            }
        }

        async fn open_page(&self, url: &Url) -> Result<Page> {
            let mut guard = self.browser.lock().await;
            if guard.is_none() {
                log::info!("Launching headless browser");
                let config = BrowserConfig::builder()
                    .request_timeout(self.request_timeout)
                    .no_sandbox()
                    .arg("--disable-gpu")
                    .arg("--disable-dev-shm-usage")
                    .arg(format!("--user-agent={}", self.user_agent))
                    .build()
                    .map_err(Error::Crawl)?;
                let (browser, mut handler) = Browser::launch(config).await?;
                tokio::spawn(async move {
                    while let Some(event) = handler.next().await {
                        if event.is_err() {
                            break;
                        }
                    }
                });
                *guard = Some(browser);
            }
            let browser = guard
                .as_ref()
                .ok_or_else(|| Error::Crawl("browser not running".to_string()))?;
            Ok(browser.new_page(url.as_str()).await?)
        }

        async fn scroll_to_bottom(&self, page: &Page) -> Result<()> {
            for _ in 0..self.config.scroll_viewports {
                let at_bottom: bool = page
                    .evaluate(SCROLL_STEP)
                    .await?
                    .into_value()
                    .map_err(|e| Error::Crawl(e.to_string()))?;
                if at_bottom {
                    break;
                }
                tokio::time::sleep(Duration::from_millis(200)).await;
            }
            Ok(())
        }

        async fn render_page(&self, url: &Url) -> Result<String> {
            let page = self.open_page(url).await?;
            let html = self.read_page(&page, url).await;
            then_close(html, page.close()).await
        }

        async fn read_page(&self, page: &Page, url: &Url) -> Result<String> {
            page.wait_for_navigation().await?;
            if self.config.block_navigation {
                page.evaluate(BLOCK_NAVIGATION).await?;
            }
            if tokio::time::timeout(self.config.scroll_timeout(), self.scroll_to_bottom(page))
                .await
                .is_err()
            {
                log::debug!("Scrolling {url} timed out");
            }
            Ok(page.content().await?)
        }
    }

    #[async_trait]
    impl PageRenderer for HeadlessRenderer {
        async fn render(&self, url: &Url, fetched: String) -> Result<String> {
            match self.render_page(url).await {
                Ok(html) => Ok(html),
                Err(e) => {
                    log::warn!("Headless rendering of {url} failed, keeping fetched markup: {e}");
                    Ok(fetched)
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use std::future::Future;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn passthrough_keeps_markup() {
        let url = Url::parse("https://example.com/").unwrap();
        let html = "<html><body>hi</body></html>".to_string();
        let rendered = PassthroughRenderer.render(&url, html.clone()).await.unwrap();
        assert_eq!(rendered, html);
    }

    fn counted_close(
        closed: &AtomicUsize,
        outcome: Result<()>,
    ) -> impl Future<Output = Result<()>> + '_ {
        async move {
            closed.fetch_add(1, Ordering::SeqCst);
            outcome
        }
    }

    #[tokio::test]
    async fn closes_after_success_and_failure() {
        let closed = AtomicUsize::new(0);

        let ok = then_close(Ok("page"), counted_close(&closed, Ok(()))).await;
        assert_eq!(ok.unwrap(), "page");

        let failed: Result<&str> = then_close(
            Err(Error::Crawl("navigation failed".into())),
            counted_close(&closed, Ok(())),
        )
        .await;
        assert!(matches!(failed, Err(Error::Crawl(m)) if m == "navigation failed"));

        let both: Result<&str> = then_close(
            Err(Error::Crawl("evaluate failed".into())),
            counted_close(&closed, Err(Error::Crawl("tab gone".into()))),
        )
        .await;
        assert!(matches!(both, Err(Error::Crawl(m)) if m == "evaluate failed"));

        assert_eq!(closed.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn close_failure_replaces_success() {
        let closed = AtomicUsize::new(0);
        let result = then_close(
            Ok("page"),
            counted_close(&closed, Err(Error::Crawl("tab gone".into()))),
        )
        .await;
        assert!(matches!(result, Err(Error::Crawl(m)) if m == "tab gone"));
    }
}
