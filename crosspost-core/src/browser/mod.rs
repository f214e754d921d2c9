mod chromium;
mod error;
mod locator;
mod session;

pub use chromium::{ChromiumLauncher, ChromiumSession};
pub use error::{BrowserError, BrowserResult};
pub use locator::{ElementRef, Key, Locator};
pub use session::{SessionDriver, SessionLauncher};
