use std::fmt;
use std::fs;
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;

use clap::{Args, Parser, Subcommand, ValueEnum};
use serde::Serialize;
use thiserror::Error;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use crosspost_core::{
    load_config, CancelSignal, ChromiumLauncher, CmsPoster, Credentials, CrosspostConfig,
    HttpAssetFetcher, ImageRewriter, PostOutcome, PostPayload, PublishWorkflow, WorkflowConfig,
    WorkflowOptions, WorkflowReport, CMS_PASSWORD_ENV, CMS_USERNAME_ENV, PASSWORD_ENV,
    USERNAME_ENV,
};

pub type Result<T> = std::result::Result<T, AppError>;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("config error: {0}")]
    Config(#[from] crosspost_core::ConfigError),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("serialization error: {0}")]
    Serialize(#[from] serde_json::Error),
    #[error("fetcher setup failed: {0}")]
    Fetch(#[from] crosspost_core::FetchError),
    #[error("cms post failed: {0}")]
    Post(#[from] crosspost_core::PostError),
    #[error("publish failed at {state}: {message}")]
    WorkflowFailed { state: String, message: String },
    #[error("one or more checks failed")]
    CheckFailed,
}

#[derive(Parser, Debug)]
#[command(author, version, about = "Publish videos and posts across platforms", long_about = None)]
pub struct Cli {
    /// Path to crosspost.toml
    #[arg(long, default_value = "configs/crosspost.toml")]
    pub config: PathBuf,
    /// Output format
    #[arg(long, value_enum, default_value_t = OutputFormat::Text)]
    pub format: OutputFormat,
    /// Log at debug level unless RUST_LOG says otherwise
    #[arg(short, long, global = true)]
    pub verbose: bool,
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the browser publish workflow once
    Publish(PublishArgs),
    /// Create a post through the CMS REST endpoint
    Post(PostArgs),
    /// Route third-party images in an HTML document through the image proxy
    Rewrite(RewriteArgs),
    /// Validate configuration and credentials without side effects
    Check,
}

#[derive(Args, Debug, Default)]
pub struct PublishArgs {
    /// Show the browser window
    #[arg(long)]
    pub headed: bool,
    /// Abort between states once this many seconds have passed
    #[arg(long)]
    pub deadline_secs: Option<u64>,
    /// Overrides CROSSPOST_USERNAME
    #[arg(long)]
    pub username: Option<String>,
    /// Overrides CROSSPOST_PASSWORD
    #[arg(long)]
    pub password: Option<String>,
    /// Where to write the failure screenshot
    #[arg(long)]
    pub error_screenshot: Option<PathBuf>,
}

#[derive(Args, Debug)]
pub struct PostArgs {
    /// HTML body of the post
    #[arg(long)]
    pub input: PathBuf,
    #[arg(long)]
    pub title: String,
    /// Post status (defaults to cms.default_status)
    #[arg(long)]
    pub status: Option<String>,
    #[arg(long)]
    pub excerpt: Option<String>,
    /// Overrides cms.endpoint
    #[arg(long)]
    pub endpoint: Option<String>,
    /// Rewrite filtered images before posting
    #[arg(long)]
    pub rewrite_images: bool,
}

#[derive(Args, Debug, Default)]
pub struct RewriteArgs {
    /// HTML file to read; stdin when absent
    #[arg(long)]
    pub input: Option<PathBuf>,
    /// File to write; stdout when absent
    #[arg(long)]
    pub output: Option<PathBuf>,
    /// Filtered domain; repeat to replace rewriter.filtered_domains
    #[arg(long = "domain")]
    pub domains: Vec<String>,
}

pub async fn run(cli: Cli) -> Result<()> {
    let config = load_config(&cli.config)?;
    info!(config = %cli.config.display(), "configuration loaded");

    match &cli.command {
        Commands::Publish(args) => {
            let report = publish(&config, args).await?;
            let summary = PublishSummary::from(&report);
            render(&summary, cli.format)?;
            if let Some(failure) = report.failure {
                return Err(AppError::WorkflowFailed {
                    state: failure.state.to_string(),
                    message: failure.error.to_string(),
                });
            }
        }
        Commands::Post(args) => {
            let outcome = post(&config, args).await?;
            render(&PostSummary { outcome }, cli.format)?;
        }
        Commands::Rewrite(args) => {
            let summary = rewrite(&config, args)?;
            if args.output.is_some() {
                render(&summary, cli.format)?;
            }
        }
        Commands::Check => {
            let report = check(&config);
            render(&report, cli.format)?;
            if report
                .iter()
                .any(|entry| matches!(entry.status, CheckStatus::Error))
            {
                return Err(AppError::CheckFailed);
            }
        }
    }

    Ok(())
}

impl Cli {
    /// `rewrite` without `--output` owns stdout, so its log lines go to stderr.
    pub fn logs_to_stderr(&self) -> bool {
        matches!(&self.command, Commands::Rewrite(args) if args.output.is_none())
    }
}

/// Installs the fmt subscriber. `RUST_LOG` wins over `verbose`.
pub fn init_tracing(verbose: bool, to_stderr: bool) {
    let fallback = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(fallback));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    let _ = if to_stderr {
        builder.with_writer(io::stderr).try_init()
    } else {
        builder.with_writer(io::stdout).try_init()
    };
}

fn publish_credentials(args: &PublishArgs) -> Credentials {
    let mut credentials = Credentials::from_env(USERNAME_ENV, PASSWORD_ENV);
    if let Some(username) = &args.username {
        credentials.username = username.clone();
    }
    if let Some(password) = &args.password {
        credentials.password = password.clone();
    }
    credentials
}

async fn publish(config: &CrosspostConfig, args: &PublishArgs) -> Result<WorkflowReport> {
    let workflow_config = WorkflowConfig::from_parts(&config.publish, publish_credentials(args));
    let launcher = ChromiumLauncher::new(config.browser.clone(), config.timings.clone());
    let fetcher = HttpAssetFetcher::new(&config.fetcher)?;
    let options = WorkflowOptions {
        headless: config.browser.headless && !args.headed,
        error_screenshot: Some(
            args.error_screenshot
                .clone()
                .unwrap_or_else(|| config.diagnostics.error_screenshot.clone()),
        ),
        confirmation_screenshot: config.diagnostics.confirmation_screenshot.clone(),
    };

    let cancel = match args.deadline_secs {
        Some(secs) => CancelSignal::with_deadline(Duration::from_secs(secs)),
        None => CancelSignal::new(),
    };
    let on_interrupt = cancel.clone();
    let interrupt = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received; stopping after the current state");
            on_interrupt.cancel();
        }
    });

    let report = PublishWorkflow::new(
        &workflow_config,
        &config.platform,
        &config.timings,
        &launcher,
        &fetcher,
    )
    .with_options(options)
    .run(&cancel)
    .await;
    interrupt.abort();
    Ok(report?)
}

async fn post(config: &CrosspostConfig, args: &PostArgs) -> Result<PostOutcome> {
    let cms = config.cms.as_ref();
    let endpoint = match (&args.endpoint, cms) {
        (Some(endpoint), _) => endpoint.clone(),
        (None, Some(section)) => section.endpoint.clone(),
        (None, None) => {
            return Err(crosspost_core::PostError::Config(
                "no [cms] section and no --endpoint given".into(),
            )
            .into())
        }
    };
    let poster = match cms {
        Some(section) => CmsPoster::from_config(section)?,
        None => CmsPoster::new(Duration::from_secs(30))?,
    };

    let mut content = fs::read_to_string(&args.input)?;
    if args.rewrite_images {
        let rewriter = ImageRewriter::from_config(&config.rewriter);
        content = rewriter.rewrite(&content, &config.rewriter.filtered_domains);
    }
    let payload = PostPayload {
        title: args.title.clone(),
        content,
        status: args
            .status
            .clone()
            .or_else(|| cms.map(|section| section.default_status.clone()))
            .unwrap_or_else(|| "draft".to_string()),
        excerpt: args.excerpt.clone(),
    };
    let credentials = Credentials::from_env(CMS_USERNAME_ENV, CMS_PASSWORD_ENV);
    Ok(poster.post(&endpoint, &credentials, &payload).await?)
}

fn rewrite(config: &CrosspostConfig, args: &RewriteArgs) -> Result<RewriteSummary> {
    let html = match &args.input {
        Some(path) => fs::read_to_string(path)?,
        None => {
            let mut buffer = String::new();
            io::stdin().read_to_string(&mut buffer)?;
            buffer
        }
    };
    let domains = if args.domains.is_empty() {
        config.rewriter.filtered_domains.clone()
    } else {
        args.domains.clone()
    };
    let rewriter = ImageRewriter::from_config(&config.rewriter);
    let rewritten = rewriter.rewrite(&html, &domains);
    let summary = RewriteSummary {
        input: args.input.clone(),
        output: args.output.clone(),
        proxied_images: count_proxied(&rewritten, rewriter.proxy_host())
            .saturating_sub(count_proxied(&html, rewriter.proxy_host())),
        changed: rewritten != html,
    };

    match &args.output {
        Some(path) => fs::write(path, rewritten)?,
        None => {
            let mut stdout = io::stdout().lock();
            stdout.write_all(rewritten.as_bytes())?;
            stdout.flush()?;
        }
    }
    Ok(summary)
}

fn count_proxied(html: &str, proxy_host: &str) -> usize {
    html.matches(&format!("https://{proxy_host}/?url=")).count()
}

fn check(config: &CrosspostConfig) -> Vec<HealthEntry> {
    let mut results = Vec::new();
    results.push(check_path("chromium", Path::new(&config.browser.executable_path)));

    let credentials = Credentials::from_env(USERNAME_ENV, PASSWORD_ENV);
    match WorkflowConfig::from_parts(&config.publish, credentials).validate() {
        Ok(()) => results.push(HealthEntry::ok("publish", "workflow inputs are complete")),
        Err(err) => results.push(HealthEntry::error("publish", err.to_string())),
    }

    match &config.cms {
        Some(cms) => {
            let credentials = Credentials::from_env(CMS_USERNAME_ENV, CMS_PASSWORD_ENV);
            if credentials.username.is_empty() || credentials.password.is_empty() {
                results.push(HealthEntry::warn(
                    "cms",
                    format!("{CMS_USERNAME_ENV}/{CMS_PASSWORD_ENV} not set"),
                ));
            } else {
                results.push(HealthEntry::ok("cms", cms.endpoint.clone()));
            }
        }
        None => results.push(HealthEntry::warn("cms", "no [cms] section")),
    }

    if config.rewriter.filtered_domains.is_empty() {
        results.push(HealthEntry::warn("rewriter", "no filtered domains; rewrite is a no-op"));
    } else {
        results.push(HealthEntry::ok(
            "rewriter",
            format!(
                "{} domain(s) via {}",
                config.rewriter.filtered_domains.len(),
                config.rewriter.proxy_host
            ),
        ));
    }
    results
}

fn check_path(name: &str, path: &Path) -> HealthEntry {
    if path.exists() {
        HealthEntry::ok(name, path.display().to_string())
    } else {
        HealthEntry::error(name, format!("{} not found", path.display()))
    }
}

fn render<T>(value: &T, format: OutputFormat) -> Result<()>
where
    T: Serialize + DisplayFallback,
{
    match format {
        OutputFormat::Text => {
            println!("{}", value.display());
            Ok(())
        }
        OutputFormat::Json => {
            let json = serde_json::to_string_pretty(value)?;
            println!("{}", json);
            Ok(())
        }
    }
}

trait DisplayFallback {
    fn display(&self) -> String;
}

#[derive(Debug, Serialize)]
pub struct PublishSummary {
    pub terminal: String,
    pub visited: Vec<String>,
    pub failed_state: Option<String>,
    pub error: Option<String>,
    pub diagnostic_step: Option<String>,
    pub diagnostic_bytes: Option<usize>,
    pub diagnostic_sha256: Option<String>,
    pub asset_bytes: Option<u64>,
    pub final_url: Option<String>,
    pub elapsed_ms: u64,
}

impl From<&WorkflowReport> for PublishSummary {
    fn from(report: &WorkflowReport) -> Self {
        Self {
            terminal: report.terminal.to_string(),
            visited: report.visited.iter().map(ToString::to_string).collect(),
            failed_state: report.failure.as_ref().map(|f| f.state.to_string()),
            error: report.failure.as_ref().map(|f| f.error.to_string()),
            diagnostic_step: report.diagnostic.as_ref().map(|d| d.step_name.clone()),
            diagnostic_bytes: report.diagnostic.as_ref().map(|d| d.image_bytes.len()),
            diagnostic_sha256: report.diagnostic.as_ref().and_then(|d| d.sha256()),
            asset_bytes: report.asset_bytes,
            final_url: report.final_url.clone(),
            elapsed_ms: report.elapsed.as_millis() as u64,
        }
    }
}

impl DisplayFallback for PublishSummary {
    fn display(&self) -> String {
        let mut lines = vec![format!("State: {} ({} ms)", self.terminal, self.elapsed_ms)];
        lines.push(format!("Path: {}", self.visited.join(" -> ")));
        if let Some(bytes) = self.asset_bytes {
            lines.push(format!("Asset: {bytes} bytes"));
        }
        if let Some(url) = &self.final_url {
            lines.push(format!("Published at: {url}"));
        }
        if let (Some(state), Some(error)) = (&self.failed_state, &self.error) {
            lines.push(format!("Failed at {state}: {error}"));
        }
        if let Some(step) = &self.diagnostic_step {
            match self.diagnostic_bytes {
                Some(0) | None => lines.push(format!("Diagnostic: {step} (no screenshot)")),
                Some(bytes) => lines.push(format!("Diagnostic: {step} ({bytes} bytes)")),
            }
        }
        lines.join("\n")
    }
}

#[derive(Debug, Serialize)]
pub struct PostSummary {
    #[serde(flatten)]
    pub outcome: PostOutcome,
}

impl DisplayFallback for PostSummary {
    fn display(&self) -> String {
        match &self.outcome {
            PostOutcome::Published { id, link } => format!("Post {id} created: {link}"),
            PostOutcome::AmbiguousSuccess { status, body } => format!(
                "CMS answered {status} without a post document; verify manually.\n{body}"
            ),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct RewriteSummary {
    pub input: Option<PathBuf>,
    pub output: Option<PathBuf>,
    pub proxied_images: usize,
    pub changed: bool,
}

impl DisplayFallback for RewriteSummary {
    fn display(&self) -> String {
        let target = self
            .output
            .as_ref()
            .map(|path| path.display().to_string())
            .unwrap_or_else(|| "stdout".to_string());
        if self.changed {
            format!("{} image(s) proxied -> {target}", self.proxied_images)
        } else {
            format!("No filtered images; copied unchanged -> {target}")
        }
    }
}

#[derive(Debug, Serialize)]
pub struct HealthEntry {
    pub name: String,
    pub status: CheckStatus,
    pub detail: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CheckStatus {
    Ok,
    Warn,
    Error,
}

impl fmt::Display for CheckStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            CheckStatus::Ok => "OK",
            CheckStatus::Warn => "WARN",
            CheckStatus::Error => "ERROR",
        };
        write!(f, "{}", label)
    }
}

impl HealthEntry {
    fn ok(name: impl Into<String>, detail: impl Into<String>) -> Self {
        Self::new(name, CheckStatus::Ok, detail)
    }

    fn warn(name: impl Into<String>, detail: impl Into<String>) -> Self {
        Self::new(name, CheckStatus::Warn, detail)
    }

    fn error(name: impl Into<String>, detail: impl Into<String>) -> Self {
        Self::new(name, CheckStatus::Error, detail)
    }

    fn new(name: impl Into<String>, status: CheckStatus, detail: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            status,
            detail: detail.into(),
        }
    }
}

impl DisplayFallback for Vec<HealthEntry> {
    fn display(&self) -> String {
        self.iter()
            .map(|entry| format!("[{}] {}: {}", entry.status, entry.name, entry.detail))
            .collect::<Vec<_>>()
            .join("\n")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crosspost_core::{DiagnosticArtifact, StepFailure, WorkflowError, WorkflowState};
    use tempfile::TempDir;

    fn fixture() -> CrosspostConfig {
        load_config("../configs/crosspost.toml").unwrap()
    }

    #[test]
    fn publish_flags_parse() {
        let cli = Cli::try_parse_from([
            "crosspostctl",
            "--format",
            "json",
            "publish",
            "--headed",
            "--deadline-secs",
            "900",
            "--error-screenshot",
            "/tmp/fail.png",
        ])
        .unwrap();
        assert!(matches!(cli.format, OutputFormat::Json));
        match cli.command {
            Commands::Publish(args) => {
                assert!(args.headed);
                assert_eq!(args.deadline_secs, Some(900));
                assert_eq!(args.error_screenshot, Some(PathBuf::from("/tmp/fail.png")));
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn post_requires_input_and_title() {
        assert!(Cli::try_parse_from(["crosspostctl", "post", "--title", "x"]).is_err());
        let cli = Cli::try_parse_from([
            "crosspostctl",
            "post",
            "--input",
            "body.html",
            "--title",
            "Hello",
            "--rewrite-images",
        ])
        .unwrap();
        assert!(matches!(cli.command, Commands::Post(PostArgs { rewrite_images: true, .. })));
    }

    #[test]
    fn rewrite_to_stdout_moves_logs_to_stderr() {
        let cli = Cli::try_parse_from(["crosspostctl", "rewrite", "--input", "a.html"]).unwrap();
        assert!(cli.logs_to_stderr());
        let cli = Cli::try_parse_from([
            "crosspostctl",
            "rewrite",
            "--input",
            "a.html",
            "--output",
            "b.html",
        ])
        .unwrap();
        assert!(!cli.logs_to_stderr());
        let cli = Cli::try_parse_from(["crosspostctl", "check"]).unwrap();
        assert!(!cli.logs_to_stderr());
    }

    #[test]
    fn command_line_credentials_override_environment() {
        let args = PublishArgs {
            username: Some("flag-user".into()),
            password: Some("flag-pass".into()),
            ..PublishArgs::default()
        };
        let credentials = publish_credentials(&args);
        assert_eq!(credentials.username, "flag-user");
        assert_eq!(credentials.password, "flag-pass");
    }

    #[test]
    fn rewrite_writes_output_file() {
        let temp = TempDir::new().unwrap();
        let input = temp.path().join("in.html");
        let output = temp.path().join("out.html");
        fs::write(
            &input,
            r#"<p>Hi</p><img src="https://pbs.twimg.com/a.jpg"><img src="https://example.com/b.jpg">"#,
        )
        .unwrap();

        let summary = rewrite(
            &fixture(),
            &RewriteArgs {
                input: Some(input),
                output: Some(output.clone()),
                domains: Vec::new(),
            },
        )
        .unwrap();

        assert!(summary.changed);
        assert_eq!(summary.proxied_images, 1);
        assert_eq!(
            fs::read_to_string(output).unwrap(),
            r#"<p>Hi</p><img src="https://wsrv.nl/?url=https://pbs.twimg.com/a.jpg" alt="image"><img src="https://example.com/b.jpg">"#
        );
    }

    #[test]
    fn rewrite_domain_flags_replace_configured_domains() {
        let temp = TempDir::new().unwrap();
        let input = temp.path().join("in.html");
        let output = temp.path().join("out.html");
        let html = r#"<img src="https://pbs.twimg.com/a.jpg">"#;
        fs::write(&input, html).unwrap();

        let summary = rewrite(
            &fixture(),
            &RewriteArgs {
                input: Some(input),
                output: Some(output.clone()),
                domains: vec!["example.net".into()],
            },
        )
        .unwrap();

        assert!(!summary.changed);
        assert_eq!(fs::read_to_string(output).unwrap(), html);
    }

    #[test]
    fn failed_report_summary_names_the_state() {
        let report = WorkflowReport {
            terminal: WorkflowState::Failed,
            visited: vec![
                WorkflowState::FetchAsset,
                WorkflowState::Authenticate,
                WorkflowState::Failed,
            ],
            failure: Some(StepFailure {
                state: WorkflowState::Authenticate,
                error: WorkflowError::AuthenticationFailed {
                    url: "https://studio.example-video.com/signin".into(),
                },
            }),
            diagnostic: Some(DiagnosticArtifact::empty("AUTHENTICATE")),
            confirmation: None,
            asset_bytes: Some(1024),
            final_url: None,
            elapsed: Duration::from_millis(1500),
        };

        let summary = PublishSummary::from(&report);
        assert_eq!(summary.terminal, "FAILED");
        assert_eq!(summary.failed_state.as_deref(), Some("AUTHENTICATE"));
        assert_eq!(summary.diagnostic_bytes, Some(0));
        let text = summary.display();
        assert!(text.contains("FETCH_ASSET -> AUTHENTICATE -> FAILED"));
        assert!(text.contains("Diagnostic: AUTHENTICATE (no screenshot)"));

        let json = serde_json::to_value(&summary).unwrap();
        assert_eq!(json["elapsed_ms"], 1500);
    }

    #[test]
    fn post_summary_flattens_outcome() {
        let summary = PostSummary {
            outcome: PostOutcome::Published {
                id: 7,
                link: "https://blog.example.org/?p=7".into(),
            },
        };
        let json = serde_json::to_value(&summary).unwrap();
        assert_eq!(json["outcome"], "published");
        assert_eq!(json["id"], 7);
        assert_eq!(summary.display(), "Post 7 created: https://blog.example.org/?p=7");
    }

    #[test]
    fn check_flags_missing_browser_binary() {
        let mut config = fixture();
        config.browser.executable_path = "/nonexistent/chromium".into();
        let report = check(&config);
        let chromium = report.iter().find(|entry| entry.name == "chromium").unwrap();
        assert!(matches!(chromium.status, CheckStatus::Error));
        assert!(report
            .iter()
            .any(|entry| entry.name == "rewriter" && matches!(entry.status, CheckStatus::Ok)));
    }
}
