use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;

use super::error::BrowserResult;
use super::locator::{ElementRef, Key, Locator};

/// Imperative capability surface over one live browser session.
///
/// Implementations are not safe for concurrent use; every call completes (or times
/// out) before the next one is issued.
#[async_trait(?Send)]
pub trait SessionDriver {
    async fn navigate(&mut self, url: &str) -> BrowserResult<()>;

    /// Resolves one element, polling until it appears or `wait` elapses.
    async fn locate(&mut self, locator: &Locator, wait: Duration) -> BrowserResult<ElementRef>;

    async fn clear(&mut self, element: ElementRef) -> BrowserResult<()>;
    async fn type_text(&mut self, element: ElementRef, text: &str) -> BrowserResult<()>;
    async fn click(&mut self, element: ElementRef) -> BrowserResult<()>;
    async fn send_key(&mut self, element: ElementRef, key: Key) -> BrowserResult<()>;

    /// Hands a local file to a file-input element.
    async fn attach_file(&mut self, element: ElementRef, path: &Path) -> BrowserResult<()>;

    /// Best effort; an empty buffer means the capture failed.
    async fn screenshot(&mut self) -> Vec<u8>;

    async fn current_url(&mut self) -> BrowserResult<String>;

    /// Idempotent and infallible.
    async fn close(&mut self);
}

#[async_trait(?Send)]
pub trait SessionLauncher {
    async fn launch(&self, headless: bool) -> BrowserResult<Box<dyn SessionDriver>>;
}
