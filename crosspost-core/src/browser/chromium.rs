use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chromiumoxide::browser::{Browser, BrowserConfig as ChromiumConfig};
use chromiumoxide::cdp::browser_protocol::dom::SetFileInputFilesParams;
use chromiumoxide::cdp::browser_protocol::page::NavigateParams;
use chromiumoxide::cdp::browser_protocol::target::CreateTargetParams;
use chromiumoxide::element::Element;
use chromiumoxide::handler::viewport::Viewport as ChromiumViewport;
use chromiumoxide::page::{Page, ScreenshotParams};
use futures::StreamExt;
use rand::Rng;
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout};
use tracing::{debug, info, trace, warn};
use uuid::Uuid;

use crate::config::{BrowserSection, TimingsSection};

use super::error::{BrowserError, BrowserResult};
use super::locator::{ElementRef, Key, Locator};
use super::session::{SessionDriver, SessionLauncher};

const REF_ATTRIBUTE: &str = "data-crosspost-ref";

/// Empties an input, textarea or contenteditable field and notifies listeners.
const CLEAR_FIELD_JS: &str = "function() {
    if (this.isContentEditable) { this.textContent = ''; } else { this.value = ''; }
    this.dispatchEvent(new Event('input', { bubbles: true }));
}";

/// Starts isolated Chromium sessions, each with a throwaway profile directory.
#[derive(Debug, Clone)]
pub struct ChromiumLauncher {
    config: Arc<BrowserSection>,
    timings: TimingsSection,
}

impl ChromiumLauncher {
    pub fn new(config: BrowserSection, timings: TimingsSection) -> Self {
        Self {
            config: Arc::new(config),
            timings,
        }
    }

    fn allocate_profile(&self) -> BrowserResult<PathBuf> {
        let path = Path::new(&self.config.profile_dir).join(Uuid::new_v4().to_string());
        std::fs::create_dir_all(&path).map_err(|err| {
            BrowserError::Launch(format!(
                "failed to create profile dir {}: {err}",
                path.display()
            ))
        })?;
        Ok(path)
    }

    fn build_chromium_config(&self, profile: &Path, headless: bool) -> BrowserResult<ChromiumConfig> {
        let [width, height] = self.config.window;
        let mut builder = ChromiumConfig::builder()
            .chrome_executable(&self.config.executable_path)
            .user_data_dir(profile)
            .viewport(ChromiumViewport {
                width,
                height,
                device_scale_factor: None,
                emulating_mobile: false,
                is_landscape: width >= height,
                has_touch: false,
            });

        if !headless {
            builder = builder.with_head();
        }
        if !self.config.sandbox {
            builder = builder.no_sandbox();
        }
        if let Some(seconds) = self.config.request_timeout_seconds {
            builder = builder.request_timeout(Duration::from_secs(seconds));
        }

        let mut args = vec![
            format!("--window-size={width},{height}"),
            "--no-first-run".to_string(),
            "--password-store=basic".to_string(),
            "--disable-features=AutomationControlled".to_string(),
        ];
        if self.config.disable_gpu {
            args.push("--disable-gpu".into());
        }
        if let Some(user_agent) = &self.config.user_agent {
            args.push(format!("--user-agent={user_agent}"));
        }
        if let Some(lang) = &self.config.lang {
            args.push(format!("--lang={lang}"));
        }
        builder = builder.args(args);

        builder.build().map_err(BrowserError::Configuration)
    }
}

#[async_trait(?Send)]
impl SessionLauncher for ChromiumLauncher {
    async fn launch(&self, headless: bool) -> BrowserResult<Box<dyn SessionDriver>> {
        let profile = self.allocate_profile()?;
        let chromium_config = self.build_chromium_config(&profile, headless)?;
        info!(
            profile = %profile.display(),
            headless,
            width = self.config.window[0],
            height = self.config.window[1],
            "Launching Chromium instance"
        );

        let (browser, mut handler) = Browser::launch(chromium_config)
            .await
            .map_err(|err| BrowserError::Launch(err.to_string()))?;
        let handler_task = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if let Err(err) = event {
                    debug!(error = %err, "Chromium handler reported error");
                }
            }
        });

        let mut session = ChromiumSession {
            browser: Some(browser),
            page: None,
            handler_task: Some(handler_task),
            profile,
            elements: HashMap::new(),
            next_ref: 0,
            typing_delay_ms: self.config.typing_delay_ms,
            timings: self.timings.clone(),
        };
        let page = match session.open_page().await {
            Ok(page) => page,
            Err(err) => {
                session.close().await;
                return Err(BrowserError::Launch(format!("failed to open page: {err}")));
            }
        };
        session.page = Some(page);
        Ok(Box::new(session))
    }
}

#[derive(Debug)]
pub struct ChromiumSession {
    browser: Option<Browser>,
    page: Option<Page>,
    handler_task: Option<JoinHandle<()>>,
    profile: PathBuf,
    elements: HashMap<u64, Element>,
    next_ref: u64,
    typing_delay_ms: [u64; 2],
    timings: TimingsSection,
}

impl ChromiumSession {
    async fn open_page(&self) -> BrowserResult<Page> {
        let browser = self
            .browser
            .as_ref()
            .ok_or_else(|| BrowserError::Launch("browser already closed".into()))?;
        Ok(browser.new_page(CreateTargetParams::new("about:blank")).await?)
    }

    fn page(&self) -> BrowserResult<&Page> {
        self.page
            .as_ref()
            .ok_or_else(|| BrowserError::Interaction("session is closed".into()))
    }

    fn element(&self, element: ElementRef) -> BrowserResult<&Element> {
        self.elements.get(&element.id()).ok_or_else(|| {
            BrowserError::Interaction(format!("unknown element ref {}", element.id()))
        })
    }

    fn register(&mut self, element: Element) -> ElementRef {
        self.next_ref += 1;
        self.elements.insert(self.next_ref, element);
        ElementRef::new(self.next_ref)
    }

    async fn try_find(&self, locator: &Locator, marker: u64) -> Option<Element> {
        let page = self.page().ok()?;
        let selector = match locator.as_css() {
            Some(selector) => selector,
            None => {
                let script = tagging_script(locator, marker)?;
                let tagged: bool = page.evaluate(script.as_str()).await.ok()?.into_value().ok()?;
                if !tagged {
                    return None;
                }
                format!("[{REF_ATTRIBUTE}='{marker}']")
            }
        };
        page.find_element(selector).await.ok()
    }

    fn typing_delay(&self) -> Duration {
        let [low, high] = self.typing_delay_ms;
        if high == 0 {
            return Duration::ZERO;
        }
        let millis = rand::thread_rng().gen_range(low.min(high)..=high.max(low));
        Duration::from_millis(millis)
    }
}

#[async_trait(?Send)]
impl SessionDriver for ChromiumSession {
    async fn navigate(&mut self, url: &str) -> BrowserResult<()> {
        self.elements.clear();
        let params = NavigateParams::builder()
            .url(url)
            .build()
            .map_err(BrowserError::Configuration)?;
        let page = self.page()?;
        let budget = self.timings.navigation_timeout();
        let load = async {
            page.goto(params).await?;
            page.wait_for_navigation().await?;
            Ok::<_, chromiumoxide::error::CdpError>(())
        };
        match timeout(budget, load).await {
            Ok(Ok(())) => {
                debug!(url, "navigation finished");
                Ok(())
            }
            Ok(Err(err)) => Err(BrowserError::Navigation(format!("{url}: {err}"))),
            Err(_) => Err(BrowserError::Navigation(format!(
                "{url}: page load exceeded {budget:?}"
            ))),
        }
    }

    async fn locate(&mut self, locator: &Locator, wait: Duration) -> BrowserResult<ElementRef> {
        let started = Instant::now();
        let marker = self.next_ref + 1;
        let mut attempts = 0usize;
        loop {
            attempts += 1;
            if let Some(element) = self.try_find(locator, marker).await {
                trace!(%locator, attempts, "element resolved");
                return Ok(self.register(element));
            }
            if started.elapsed() >= wait {
                return Err(BrowserError::ElementNotFound(format!(
                    "{locator} after {attempts} attempts in {wait:?}"
                )));
            }
            sleep(self.timings.poll_interval()).await;
        }
    }

    async fn clear(&mut self, element: ElementRef) -> BrowserResult<()> {
        self.element(element)?
            .call_js_fn(CLEAR_FIELD_JS, false)
            .await
            .map_err(|err| BrowserError::Interaction(format!("failed to clear element: {err}")))?;
        Ok(())
    }

    async fn type_text(&mut self, element: ElementRef, text: &str) -> BrowserResult<()> {
        let target = self.element(element)?;
        target.click().await.map_err(|err| {
            BrowserError::Interaction(format!("failed to focus element before typing: {err}"))
        })?;
        for ch in text.chars() {
            target.type_str(ch.to_string()).await.map_err(|err| {
                BrowserError::Interaction(format!("failed to type character: {err}"))
            })?;
            let delay = self.typing_delay();
            if !delay.is_zero() {
                sleep(delay).await;
            }
        }
        Ok(())
    }

    async fn click(&mut self, element: ElementRef) -> BrowserResult<()> {
        self.element(element)?
            .click()
            .await
            .map_err(|err| BrowserError::Interaction(format!("failed to click element: {err}")))?;
        Ok(())
    }

    async fn send_key(&mut self, element: ElementRef, key: Key) -> BrowserResult<()> {
        self.element(element)?
            .press_key(key.as_str())
            .await
            .map_err(|err| {
                BrowserError::Interaction(format!("failed to press {}: {err}", key.as_str()))
            })?;
        Ok(())
    }

    async fn attach_file(&mut self, element: ElementRef, path: &Path) -> BrowserResult<()> {
        let absolute = std::fs::canonicalize(path)?;
        let target = self.element(element)?;
        let mut params = SetFileInputFilesParams::new(vec![absolute.to_string_lossy().to_string()]);
        params.backend_node_id = Some(target.backend_node_id.clone());
        self.page()?.execute(params).await.map_err(|err| {
            BrowserError::Interaction(format!(
                "failed to attach {}: {err}",
                absolute.display()
            ))
        })?;
        Ok(())
    }

    async fn screenshot(&mut self) -> Vec<u8> {
        let Ok(page) = self.page() else {
            return Vec::new();
        };
        match page.screenshot(ScreenshotParams::builder().build()).await {
            Ok(bytes) => bytes,
            Err(err) => {
                warn!(error = %err, "failed to capture screenshot");
                Vec::new()
            }
        }
    }

    async fn current_url(&mut self) -> BrowserResult<String> {
        Ok(self.page()?.url().await?.unwrap_or_default())
    }

    async fn close(&mut self) {
        self.elements.clear();
        self.page = None;
        if let Some(mut browser) = self.browser.take() {
            info!(profile = %self.profile.display(), "Shutting down Chromium instance");
            if let Err(err) = browser.close().await {
                warn!(error = %err, "Failed to close browser gracefully");
            }
        }
        if let Some(handle) = self.handler_task.take() {
            join_handler(handle, self.timings.navigation_timeout()).await;
        }
        if self.profile.exists() {
            if let Err(err) = tokio::fs::remove_dir_all(&self.profile).await {
                warn!(profile = %self.profile.display(), error = %err, "failed to remove profile dir");
            }
        }
    }
}

impl Drop for ChromiumSession {
    fn drop(&mut self) {
        if self.browser.is_some() {
            warn!(
                profile = %self.profile.display(),
                "ChromiumSession dropped without explicit close"
            );
        }
    }
}

/// Waits for the CDP handler to wind down, aborting it once `budget` elapses.
/// Returns whether it finished on its own.
async fn join_handler(mut handle: JoinHandle<()>, budget: Duration) -> bool {
    match timeout(budget, &mut handle).await {
        Ok(Ok(())) => true,
        Ok(Err(err)) => {
            warn!(error = %err, "Browser handler join error");
            false
        }
        Err(_) => {
            warn!(?budget, "Browser handler still running; aborting");
            handle.abort();
            false
        }
    }
}

/// Script that marks the node matched by a text or XPath locator with `marker`.
fn tagging_script(locator: &Locator, marker: u64) -> Option<String> {
    match locator {
        Locator::Text(text) => {
            let needle = serde_json::to_string(text).ok()?;
            Some(format!(
                "(() => {{
    const needle = {needle}.trim().toLowerCase();
    const candidates = Array.from(document.querySelectorAll(
        'button, a, li, option, label, span, div, [role=\"button\"], [role=\"option\"], [role=\"menuitem\"]'
    ));
    const textOf = node => (node.innerText || node.textContent || '').trim().toLowerCase();
    const exact = candidates.filter(node => textOf(node) === needle);
    const pool = exact.length > 0 ? exact : candidates.filter(node => textOf(node).includes(needle));
    const visible = pool.filter(node => node.offsetParent !== null);
    const hit = (visible.length > 0 ? visible : pool).pop();
    if (!hit) return false;
    hit.setAttribute('{REF_ATTRIBUTE}', '{marker}');
    return true;
}})()"
            ))
        }
        Locator::XPath(path) => {
            let expression = serde_json::to_string(path).ok()?;
            Some(format!(
                "(() => {{
    const result = document.evaluate({expression}, document, null, XPathResult.FIRST_ORDERED_NODE_TYPE, null);
    const hit = result.singleNodeValue;
    if (!hit || !hit.setAttribute) return false;
    hit.setAttribute('{REF_ATTRIBUTE}', '{marker}');
    return true;
}})()"
            ))
        }
        Locator::Id(_) | Locator::Css(_) => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn css_locators_need_no_script() {
        assert!(tagging_script(&Locator::css("#title"), 1).is_none());
        assert!(tagging_script(&Locator::id("title"), 1).is_none());
    }

    #[test]
    fn text_script_escapes_needle_and_tags_marker() {
        let script = tagging_script(&Locator::text("News \"& Politics\""), 7).unwrap();
        assert!(script.contains(r#""News \"& Politics\"""#));
        assert!(script.contains("'data-crosspost-ref', '7'"));
    }

    #[test]
    fn xpath_script_uses_document_evaluate() {
        let script = tagging_script(&Locator::xpath("//input[@name='tags']"), 3).unwrap();
        assert!(script.contains("document.evaluate(\"//input[@name='tags']\""));
        assert!(script.contains("'data-crosspost-ref', '3'"));
    }

    #[test]
    fn clear_script_handles_contenteditable_fields() {
        assert!(CLEAR_FIELD_JS.contains("this.isContentEditable"));
        assert!(CLEAR_FIELD_JS.contains("this.textContent = ''"));
        assert!(CLEAR_FIELD_JS.contains("this.value = ''"));
        assert!(CLEAR_FIELD_JS.starts_with("function()"));
    }

    #[tokio::test]
    async fn stuck_handler_is_aborted_after_budget() {
        let (_keep, never) = tokio::sync::oneshot::channel::<()>();
        let (dropped_tx, dropped_rx) = tokio::sync::oneshot::channel::<()>();
        let handle = tokio::spawn(async move {
            let _guard = dropped_tx;
            let _ = never.await;
        });

        let started = Instant::now();
        assert!(!join_handler(handle, Duration::from_millis(50)).await);
        assert!(started.elapsed() < Duration::from_secs(5));
        // The aborted task drops its sender.
        assert!(timeout(Duration::from_secs(5), dropped_rx)
            .await
            .unwrap()
            .is_err());
    }

    #[tokio::test]
    async fn finished_handler_joins_cleanly() {
        let handle = tokio::spawn(async {});
        assert!(join_handler(handle, Duration::from_secs(5)).await);
    }

    #[test]
    fn launcher_builds_isolated_profiles() {
        let dir = tempfile::tempdir().unwrap();
        let launcher = ChromiumLauncher::new(
            BrowserSection {
                executable_path: "/usr/bin/chromium".into(),
                headless: true,
                sandbox: false,
                disable_gpu: true,
                profile_dir: dir.path().to_string_lossy().to_string(),
                window: [1280, 720],
                user_agent: None,
                lang: None,
                typing_delay_ms: [0, 0],
                request_timeout_seconds: None,
            },
            TimingsSection::immediate(),
        );
        let first = launcher.allocate_profile().unwrap();
        let second = launcher.allocate_profile().unwrap();
        assert_ne!(first, second);
        assert!(first.starts_with(dir.path()));
        assert!(first.is_dir());
    }
}
