mod cancel;
mod error;
mod state;

use std::panic::AssertUnwindSafe;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use futures::FutureExt;
use tokio::time::sleep;
use tracing::{error, info, warn};

use crate::browser::{BrowserError, Key, Locator, SessionDriver, SessionLauncher};
use crate::config::{PlatformSection, TimingsSection, WorkflowConfig};
use crate::diagnostics::{self, DiagnosticArtifact};
use crate::error::ConfigError;
use crate::fetcher::AssetFetch;

pub use cancel::CancelSignal;
pub use error::{WorkflowError, WorkflowResult};
pub use state::WorkflowState;

#[derive(Debug, Clone)]
pub struct WorkflowOptions {
    pub headless: bool,
    pub error_screenshot: Option<PathBuf>,
    pub confirmation_screenshot: Option<PathBuf>,
}

impl Default for WorkflowOptions {
    fn default() -> Self {
        Self {
            headless: true,
            error_screenshot: Some(PathBuf::from("error_screenshot.png")),
            confirmation_screenshot: None,
        }
    }
}

/// Outcome of driving the state sequence.
#[derive(Debug)]
pub enum StepResult {
    Success,
    Failure(StepFailure),
}

#[derive(Debug)]
pub struct StepFailure {
    pub state: WorkflowState,
    pub error: WorkflowError,
}

#[derive(Debug)]
pub struct WorkflowReport {
    pub terminal: WorkflowState,
    /// States entered, ending with the terminal one.
    pub visited: Vec<WorkflowState>,
    pub failure: Option<StepFailure>,
    pub diagnostic: Option<DiagnosticArtifact>,
    pub confirmation: Option<DiagnosticArtifact>,
    pub asset_bytes: Option<u64>,
    pub final_url: Option<String>,
    pub elapsed: Duration,
}

impl WorkflowReport {
    pub fn is_success(&self) -> bool {
        self.terminal == WorkflowState::Done
    }

    pub fn exit_code(&self) -> i32 {
        if self.is_success() {
            0
        } else {
            1
        }
    }
}

/// Resources owned by one run, released in reverse acquisition order.
struct RunResources {
    asset: AssetGuard,
    session: Option<Box<dyn SessionDriver>>,
    visited: Vec<WorkflowState>,
    asset_bytes: Option<u64>,
    final_url: Option<String>,
}

impl RunResources {
    fn session(&mut self) -> WorkflowResult<&mut dyn SessionDriver> {
        match self.session.as_mut() {
            Some(session) => Ok(session.as_mut()),
            None => Err(WorkflowError::Interaction(
                "no browser session is open".to_string(),
            )),
        }
    }

    async fn teardown(&mut self) {
        if let Some(mut session) = self.session.take() {
            session.close().await;
            info!("browser session closed");
        }
        self.asset.release();
    }
}

/// Deletes the local asset when released or dropped.
struct AssetGuard {
    path: PathBuf,
    released: bool,
}

impl AssetGuard {
    fn new(path: &Path) -> Self {
        Self {
            path: path.to_path_buf(),
            released: false,
        }
    }

    fn release(&mut self) {
        if self.released {
            return;
        }
        self.released = true;
        match std::fs::remove_file(&self.path) {
            Ok(()) => info!(path = %self.path.display(), "local asset removed"),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
            Err(err) => {
                warn!(path = %self.path.display(), error = %err, "failed to remove local asset")
            }
        }
    }
}

impl Drop for AssetGuard {
    fn drop(&mut self) {
        self.release();
    }
}

enum UrlWait {
    Reached(String),
    Stuck(String),
}

/// Drives one publish run: fetch, sign in, upload, describe, publish, verify.
pub struct PublishWorkflow<'a> {
    config: &'a WorkflowConfig,
    platform: &'a PlatformSection,
    timings: &'a TimingsSection,
    launcher: &'a dyn SessionLauncher,
    fetcher: &'a dyn AssetFetch,
    options: WorkflowOptions,
}

impl<'a> PublishWorkflow<'a> {
    pub fn new(
        config: &'a WorkflowConfig,
        platform: &'a PlatformSection,
        timings: &'a TimingsSection,
        launcher: &'a dyn SessionLauncher,
        fetcher: &'a dyn AssetFetch,
    ) -> Self {
        Self {
            config,
            platform,
            timings,
            launcher,
            fetcher,
            options: WorkflowOptions::default(),
        }
    }

    pub fn with_options(mut self, options: WorkflowOptions) -> Self {
        self.options = options;
        self
    }

    /// Runs every state in order. Only an invalid configuration returns `Err`, and it
    /// does so before any network or browser activity; every other failure ends in a
    /// `FAILED` report after diagnostics and teardown.
    pub async fn run(&self, cancel: &CancelSignal) -> Result<WorkflowReport, ConfigError> {
        self.config.validate()?;
        let started = Instant::now();
        let mut resources = RunResources {
            asset: AssetGuard::new(&self.config.local_asset_path),
            session: None,
            visited: Vec::new(),
            asset_bytes: None,
            final_url: None,
        };

        let outcome = AssertUnwindSafe(self.drive(&mut resources, cancel))
            .catch_unwind()
            .await;
        let step = match outcome {
            Ok(step) => step,
            Err(panic) => {
                error!("workflow panicked; tearing down before unwinding");
                resources.teardown().await;
                std::panic::resume_unwind(panic);
            }
        };

        let mut report = WorkflowReport {
            terminal: WorkflowState::Done,
            visited: Vec::new(),
            failure: None,
            diagnostic: None,
            confirmation: None,
            asset_bytes: resources.asset_bytes,
            final_url: resources.final_url.clone(),
            elapsed: Duration::ZERO,
        };
        match step {
            StepResult::Success => {
                if let Some(path) = &self.options.confirmation_screenshot {
                    if let Ok(session) = resources.session() {
                        let artifact =
                            diagnostics::capture(session, WorkflowState::Done.as_str()).await;
                        if let Err(err) = artifact.persist(path).await {
                            warn!(error = %err, "failed to write confirmation screenshot");
                        }
                        report.confirmation = Some(artifact);
                    }
                }
            }
            StepResult::Failure(failure) => {
                let state = failure.state;
                error!(state = %state, error = %failure.error, "workflow step failed");
                let artifact = match resources.session() {
                    Ok(session) => diagnostics::capture(session, state.as_str()).await,
                    Err(_) => DiagnosticArtifact::empty(state.as_str()),
                };
                if let Some(path) = &self.options.error_screenshot {
                    if let Err(err) = artifact.persist(path).await {
                        warn!(error = %err, "failed to write diagnostic artifact");
                    }
                }
                report.terminal = WorkflowState::Failed;
                report.diagnostic = Some(artifact);
                report.failure = Some(failure);
            }
        }

        resources.teardown().await;
        resources.visited.push(report.terminal);
        report.visited = std::mem::take(&mut resources.visited);
        report.elapsed = started.elapsed();
        info!(
            state = %report.terminal,
            elapsed_ms = report.elapsed.as_millis() as u64,
            "workflow finished"
        );
        Ok(report)
    }

    async fn drive(&self, resources: &mut RunResources, cancel: &CancelSignal) -> StepResult {
        for state in WorkflowState::SEQUENCE {
            if let Err(reason) = cancel.check() {
                return StepResult::Failure(StepFailure {
                    state,
                    error: WorkflowError::Cancelled(reason),
                });
            }
            info!(state = %state, "entering state");
            resources.visited.push(state);
            if let Err(cause) = self.execute(state, resources).await {
                return StepResult::Failure(StepFailure { state, error: cause });
            }
        }
        StepResult::Success
    }

    async fn execute(
        &self,
        state: WorkflowState,
        resources: &mut RunResources,
    ) -> WorkflowResult<()> {
        match state {
            WorkflowState::FetchAsset => {
                let asset = self
                    .fetcher
                    .fetch(&self.config.asset_source_url, &self.config.local_asset_path)
                    .await?;
                resources.asset_bytes = Some(asset.bytes);
                Ok(())
            }
            WorkflowState::Authenticate => {
                let session = self
                    .launcher
                    .launch(self.options.headless)
                    .await
                    .map_err(|err| match err {
                        BrowserError::Launch(message) => WorkflowError::Launch(message),
                        other => WorkflowError::Launch(other.to_string()),
                    })?;
                resources.session = Some(session);
                self.authenticate(resources.session()?).await
            }
            WorkflowState::NavigateToUpload => {
                resources.session()?.navigate(&self.platform.upload_url).await?;
                Ok(())
            }
            WorkflowState::SubmitFile => self.submit_file(resources.session()?).await,
            WorkflowState::AwaitProcessing => self.await_processing(resources.session()?).await,
            WorkflowState::FillMetadata => self.fill_metadata(resources.session()?).await,
            WorkflowState::SelectCategory => self.select_category(resources.session()?).await,
            WorkflowState::EnterTags => self.enter_tags(resources.session()?).await,
            WorkflowState::Publish => {
                let session = resources.session()?;
                let button = session
                    .locate(
                        &self.platform.selectors.publish_button,
                        self.timings.element_wait(),
                    )
                    .await?;
                session.click(button).await?;
                Ok(())
            }
            WorkflowState::Verify => {
                let url = self.verify(resources.session()?).await?;
                resources.final_url = Some(url);
                Ok(())
            }
            WorkflowState::Done | WorkflowState::Failed => Ok(()),
        }
    }

    async fn authenticate(&self, session: &mut dyn SessionDriver) -> WorkflowResult<()> {
        let selectors = &self.platform.selectors;
        let wait = self.timings.element_wait();
        session.navigate(&self.platform.login_url).await?;

        let username = session.locate(&selectors.username_field, wait).await?;
        session.type_text(username, &self.config.username).await?;
        let password = session.locate(&selectors.password_field, wait).await?;
        session.type_text(password, &self.config.password).await?;
        let submit = session.locate(&selectors.login_submit, wait).await?;
        session.click(submit).await?;

        let marker = self.platform.signin_marker.as_str();
        match self
            .wait_for_url(session, wait, |url| !url.contains(marker))
            .await?
        {
            UrlWait::Reached(url) => {
                info!(url = %url, "signed in");
                Ok(())
            }
            UrlWait::Stuck(url) => Err(WorkflowError::AuthenticationFailed { url }),
        }
    }

    async fn submit_file(&self, session: &mut dyn SessionDriver) -> WorkflowResult<()> {
        let input = session
            .locate(
                &self.platform.selectors.file_input,
                self.timings.element_wait(),
            )
            .await?;
        session
            .attach_file(input, &self.config.local_asset_path)
            .await?;
        Ok(())
    }

    async fn await_processing(&self, session: &mut dyn SessionDriver) -> WorkflowResult<()> {
        let budget = self.timings.processing_timeout();
        match session
            .locate(&self.platform.selectors.processing_ready, budget)
            .await
        {
            Ok(_) => Ok(()),
            Err(BrowserError::ElementNotFound(_)) => Err(WorkflowError::ProcessingTimeout(budget)),
            Err(other) => Err(other.into()),
        }
    }

    async fn fill_metadata(&self, session: &mut dyn SessionDriver) -> WorkflowResult<()> {
        let selectors = &self.platform.selectors;
        let wait = self.timings.element_wait();

        let title = session.locate(&selectors.title_field, wait).await?;
        session.clear(title).await?;
        session.type_text(title, &self.config.title).await?;

        let description = session.locate(&selectors.description_field, wait).await?;
        session.clear(description).await?;
        session
            .type_text(description, &self.config.description)
            .await?;
        Ok(())
    }

    async fn select_category(&self, session: &mut dyn SessionDriver) -> WorkflowResult<()> {
        let wait = self.timings.element_wait();
        let dropdown = session
            .locate(&self.platform.selectors.category_dropdown, wait)
            .await?;
        session.click(dropdown).await?;
        let option = session
            .locate(&Locator::text(&self.config.category), wait)
            .await?;
        session.click(option).await?;
        Ok(())
    }

    async fn enter_tags(&self, session: &mut dyn SessionDriver) -> WorkflowResult<()> {
        let wait = self.timings.element_wait();
        let settle = self.timings.tag_settle();
        for (idx, tag) in self.config.tags.iter().enumerate() {
            if idx > 0 && !settle.is_zero() {
                sleep(settle).await;
            }
            let input = session
                .locate(&self.platform.selectors.tag_input, wait)
                .await?;
            session.type_text(input, tag).await?;
            session.send_key(input, Key::Enter).await?;
        }
        Ok(())
    }

    async fn verify(&self, session: &mut dyn SessionDriver) -> WorkflowResult<String> {
        let budget = self.timings.verify_timeout();
        if let Some(confirmation) = &self.platform.selectors.confirmation {
            return match session.locate(confirmation, budget).await {
                Ok(_) => Ok(session.current_url().await?),
                Err(BrowserError::ElementNotFound(message)) => {
                    Err(WorkflowError::VerificationFailed(format!(
                        "confirmation surface never appeared ({message})"
                    )))
                }
                Err(other) => Err(other.into()),
            };
        }

        let marker = self.platform.upload_marker.as_str();
        match self
            .wait_for_url(session, budget, |url| !url.contains(marker))
            .await?
        {
            UrlWait::Reached(url) => Ok(url),
            UrlWait::Stuck(url) => Err(WorkflowError::VerificationFailed(format!(
                "still on upload page {url}"
            ))),
        }
    }

    async fn wait_for_url<F>(
        &self,
        session: &mut dyn SessionDriver,
        budget: Duration,
        accept: F,
    ) -> WorkflowResult<UrlWait>
    where
        F: Fn(&str) -> bool,
    {
        let started = Instant::now();
        loop {
            let url = session.current_url().await?;
            if accept(&url) {
                return Ok(UrlWait::Reached(url));
            }
            if started.elapsed() >= budget {
                return Ok(UrlWait::Stuck(url));
            }
            sleep(self.timings.poll_interval()).await;
        }
    }
}
