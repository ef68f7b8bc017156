// src/service.rs
use std::sync::Arc;

use crate::alert::{Alerter, Incident, LogAlerter, WebhookAlerter};
use crate::batch::{self, BatchOutcome};
use crate::config::AppConfig;
use crate::errors::{GradeError, ModuleError, Result};
use crate::graders::{FsGraderLoader, GraderLoader};
use crate::models::{GradingRequest, Mode, Reply, XqueueItem};
use crate::protocol::Verdict;
use crate::sandbox::{LocalSandbox, Sandbox, SandboxFile};
use crate::worker::{Worker, parse_reply};

/// Suite size used when neither the payload nor the grader says otherwise.
pub const DEFAULT_SAMPLE_SIZE: usize = 10;

const SESSION_SERVER_FILE: &str = "session-server";
const SESSION_SETTINGS_FILE: &str = "session.toml";

/// Turns a verdict into the reply sent upstream. A message attached to a
/// rate wins over both the verdict's message and the stock one.
pub fn normalize(grader: &str, verdict: Verdict, note: Option<String>) -> Result<Reply> {
    let score = verdict.score();
    if !score.is_finite() || !(0.0..=1.0).contains(&score) {
        return Err(GradeError::module(
            grader,
            ModuleError::failed("evaluate", format!("score {} is outside [0, 1]", score)),
        ));
    }

    let reply = match verdict {
        Verdict::Score(score) => Reply::with_default_msg(score),
        Verdict::Scored(score, msg) => Reply::new(score, msg),
    };
    Ok(match note {
        Some(msg) => Reply { msg, ..reply },
        None => reply,
    })
}

/// Entry point for grading: picks the mode, runs it, and maps every failure
/// to either a reply or (fail-closed only) an error.
pub struct GradingService<S: Sandbox> {
    config: AppConfig,
    loader: Box<dyn GraderLoader>,
    sandbox: S,
    alerter: Arc<dyn Alerter>,
}

impl GradingService<LocalSandbox> {
    pub fn from_config(config: AppConfig) -> Self {
        let loader = Box::new(FsGraderLoader::new(config.grader_root.clone()));
        let alerter: Arc<dyn Alerter> = match &config.alert_webhook {
            Some(url) => Arc::new(WebhookAlerter::new(url.clone())),
            None => Arc::new(LogAlerter),
        };
        Self::new(config, loader, LocalSandbox::new(), alerter)
    }
}

impl<S: Sandbox> GradingService<S> {
    pub fn new(
        config: AppConfig,
        loader: Box<dyn GraderLoader>,
        sandbox: S,
        alerter: Arc<dyn Alerter>,
    ) -> Self {
        Self {
            config,
            loader,
            sandbox,
            alerter,
        }
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    /// Grades one queue item end to end.
    pub async fn process_item(&self, item: &XqueueItem) -> Result<Reply> {
        match GradingRequest::try_from(item) {
            Ok(request) => self.grade(&request).await,
            Err(e) => self.fail(None, e).await,
        }
    }

    /// Grades one item in its own worker process. A worker that crashes or
    /// prints nothing usable is a service defect like any other.
    pub async fn process_in_worker(&self, worker: &Worker, item: &XqueueItem) -> Result<Reply> {
        match worker.grade(item).await {
            Ok(reply) => Ok(reply),
            Err(e) => {
                let grader = GradingRequest::try_from(item)
                    .ok()
                    .map(|request| request.grader().to_string());
                self.fail(grader.as_deref(), e).await
            }
        }
    }

    pub async fn grade(&self, request: &GradingRequest) -> Result<Reply> {
        log::info!("Grading with '{}' ({:?} mode)", request.grader(), request.mode());
        let result = match request.mode() {
            Mode::Batch => self.grade_batch(request).await,
            Mode::Interactive => self.grade_interactive(request).await,
        };
        match result {
            Ok(reply) => {
                log::info!("Graded with '{}': score {}", request.grader(), reply.score);
                Ok(reply)
            }
            Err(e) => self.fail(Some(request.grader()), e).await,
        }
    }

    async fn grade_batch(&self, request: &GradingRequest) -> Result<Reply> {
        let grader = request.grader();
        let module = self
            .loader
            .load_module(grader)
            .map_err(|e| GradeError::module(grader, e))?;
        let sample_size = request.payload.sample_size.unwrap_or(DEFAULT_SAMPLE_SIZE);

        let outcome = batch::run_batch(
            module.as_ref(),
            &self.sandbox,
            &self.config.batch,
            &request.submission,
            sample_size,
        )
        .await?;

        match outcome {
            BatchOutcome::ShortCircuit(reply) => Ok(reply),
            BatchOutcome::Evaluated { verdict, note } => normalize(module.name(), verdict, note),
        }
    }

    async fn grade_interactive(&self, request: &GradingRequest) -> Result<Reply> {
        let grader = request.grader();
        let mut settings = self
            .loader
            .load_session(grader)
            .map_err(|e| GradeError::module(grader, e))?;
        if let Some(sample_size) = request.payload.sample_size {
            settings.sample_size = sample_size.max(1);
        }

        let profile = &self.config.interactive;
        let server = tokio::fs::read(&profile.session_server_bin).await.map_err(|e| {
            GradeError::ServiceDefect(format!(
                "cannot read session server {}: {}",
                profile.session_server_bin.display(),
                e
            ))
        })?;

        let files = vec![
            SandboxFile::executable(SESSION_SERVER_FILE, server),
            SandboxFile::new(SESSION_SETTINGS_FILE, settings.to_toml()?),
            SandboxFile::new(settings.client_file.clone(), request.submission.clone()),
        ];
        let command = format!("./{} {}", SESSION_SERVER_FILE, SESSION_SETTINGS_FILE);
        let handle = self
            .sandbox
            .create(&profile.profile, &command, files, &profile.limits)
            .await?;
        let output = self.sandbox.run(&handle, b"").await?;

        if output.timed_out {
            return Err(GradeError::ServiceDefect(
                "interactive container timed out".to_string(),
            ));
        }
        if output.exit_code != Some(0) {
            return Err(GradeError::ServiceDefect(format!(
                "interactive container exited with {:?}: {}",
                output.exit_code,
                output.stderr_tail(500)
            )));
        }

        let reply = parse_reply(&output.stdout)?;
        if !reply.score.is_finite() || !(0.0..=1.0).contains(&reply.score) {
            return Err(GradeError::ServiceDefect(format!(
                "session server reported score {}",
                reply.score
            )));
        }
        Ok(reply)
    }

    async fn fail(&self, grader: Option<&str>, error: GradeError) -> Result<Reply> {
        let incident = Incident::new(error.kind(), grader, error.to_string());
        self.alerter.alert(&incident).await;

        match error {
            GradeError::ModuleDefect { .. } => Ok(Reply::technical_difficulties()),
            _ if self.config.fail_open => Ok(Reply::technical_difficulties()),
            e => Err(e),
        }
    }
}
