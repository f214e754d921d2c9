pub mod browser;
pub mod cms;
pub mod config;
pub mod diagnostics;
pub mod error;
pub mod fetcher;
pub mod rewriter;
pub mod workflow;

pub use browser::{
    BrowserError, BrowserResult, ChromiumLauncher, ChromiumSession, ElementRef, Key, Locator,
    SessionDriver, SessionLauncher,
};
pub use cms::{CmsPoster, PostError, PostOutcome, PostPayload, PostResult};
pub use config::{
    load_config, BrowserSection, CmsSection, Credentials, CrosspostConfig, DiagnosticsSection,
    FetcherSection, PlatformSection, PlatformSelectors, PublishSection, RewriterSection,
    TimingsSection, WorkflowConfig, CMS_PASSWORD_ENV, CMS_USERNAME_ENV, PASSWORD_ENV,
    USERNAME_ENV,
};
pub use diagnostics::{ArtifactRecord, DiagnosticArtifact};
pub use error::{ConfigError, Result};
pub use fetcher::{AssetFetch, FetchError, FetchResult, HttpAssetFetcher, LocalAsset};
pub use rewriter::{rewrite, ImageRewriter};
pub use workflow::{
    CancelSignal, PublishWorkflow, StepFailure, StepResult, WorkflowError, WorkflowOptions,
    WorkflowReport, WorkflowResult, WorkflowState,
};
