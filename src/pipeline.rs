// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025 Jonathan D. A. Jewell <hyperpolymath>

//! Background analysis worker
//!
//! A run walks a folder (or a list of files), sends one prompt per feature
//! unit (or file) to the model backend, and appends each answer to the
//! Markdown report. Progress is reported as [`ProgressEvent`]s on an
//! unbounded channel; the last event of every run is always
//! [`ProgressEvent::Finished`], whether the run completed, was stopped, or
//! failed before it could start.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use crate::config::{AppConfig, EngineConfig};
use crate::gemini::{resolve_api_key, GeminiClient, ModelBackend};
use crate::prompt::{combine_sources, display_name, PromptBuilder};
use crate::report::{ReportWriter, RunMode};
use crate::scanner::{find_project_files, group_by_feature};
use crate::Result;

/// What to analyze
#[derive(Debug, Clone)]
pub enum AnalysisJob {
    Folder(PathBuf),
    Files(Vec<PathBuf>),
}

impl AnalysisJob {
    pub fn mode(&self) -> RunMode {
        match self {
            AnalysisJob::Folder(_) => RunMode::Folder,
            AnalysisJob::Files(_) => RunMode::Files,
        }
    }

    fn target(&self) -> String {
        match self {
            AnalysisJob::Folder(dir) => dir.display().to_string(),
            AnalysisJob::Files(files) => format!("{} files", files.len()),
        }
    }
}

/// Messages from the worker to whoever is displaying progress
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ProgressEvent {
    /// A run began; displays should clear their log
    Started { mode: RunMode, target: String },
    /// One human-readable progress line
    Line { text: String },
    /// Terminal event of a run
    Finished { summary: RunSummary },
}

/// Outcome of one run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunSummary {
    pub id: String,
    pub mode: RunMode,
    pub target: String,
    /// Units (folder mode) or files (files mode) scheduled
    pub total: usize,
    pub analyzed: usize,
    pub failed: usize,
    pub stopped: bool,
    pub report_path: Option<PathBuf>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

/// Cooperative cancellation shared between a run and its controller
#[derive(Clone)]
pub struct StopFlag {
    tx: Arc<watch::Sender<bool>>,
}

impl StopFlag {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self { tx: Arc::new(tx) }
    }

    /// Ask the run to stop after the current unit
    pub fn stop(&self) {
        self.tx.send_replace(true);
    }

    pub fn is_stopped(&self) -> bool {
        *self.tx.borrow()
    }

    /// Resolves once `stop` has been called
    pub async fn stopped(&self) {
        let mut rx = self.tx.subscribe();
        let _ = rx.wait_for(|stopped| *stopped).await;
    }
}

impl Default for StopFlag {
    fn default() -> Self {
        Self::new()
    }
}

/// Builds the model backend once the run knows it has work to do
pub type BackendFactory =
    Arc<dyn Fn(&EngineConfig) -> Result<Arc<dyn ModelBackend>> + Send + Sync>;

/// Backend factory for the hosted Gemini API
pub fn gemini_factory() -> BackendFactory {
    Arc::new(|engine: &EngineConfig| {
        let api_key = resolve_api_key(&engine.api_key_env)?;
        let client = GeminiClient::new(engine, api_key)?;
        Ok(Arc::new(client) as Arc<dyn ModelBackend>)
    })
}

/// Analysis pipeline configured for one kind of backend
#[derive(Clone)]
pub struct Pipeline {
    config: AppConfig,
    connect: BackendFactory,
    output: Option<PathBuf>,
}

impl Pipeline {
    /// Pipeline backed by Gemini
    pub fn new(config: AppConfig) -> Self {
        Self::with_backend(config, gemini_factory())
    }

    pub fn with_backend(config: AppConfig, connect: BackendFactory) -> Self {
        Self { config, connect, output: None }
    }

    /// Write the report here instead of the configured file
    pub fn with_output(mut self, output: Option<PathBuf>) -> Self {
        self.output = output;
        self
    }

    /// Run on a background task
    pub fn spawn(
        self,
        job: AnalysisJob,
        events: mpsc::UnboundedSender<ProgressEvent>,
        stop: StopFlag,
    ) -> JoinHandle<RunSummary> {
        tokio::spawn(async move { self.run(job, events, stop).await })
    }

    /// Run to completion; always emits `Finished` last
    pub async fn run(
        &self,
        job: AnalysisJob,
        events: mpsc::UnboundedSender<ProgressEvent>,
        stop: StopFlag,
    ) -> RunSummary {
        let now = Utc::now();
        let mut run = RunState {
            events,
            summary: RunSummary {
                id: uuid::Uuid::new_v4().to_string(),
                mode: job.mode(),
                target: job.target(),
                total: 0,
                analyzed: 0,
                failed: 0,
                stopped: false,
                report_path: None,
                started_at: now,
                finished_at: now,
            },
        };

        info!("Run {} started: {} {}", run.summary.id, run.summary.mode, run.summary.target);
        run.emit(ProgressEvent::Started {
            mode: run.summary.mode,
            target: run.summary.target.clone(),
        });

        let outcome = match &job {
            AnalysisJob::Folder(dir) => self.analyze_folder(dir, &mut run, &stop).await,
            AnalysisJob::Files(files) => self.analyze_files(files, &mut run, &stop).await,
        };

        if let Err(e) = outcome {
            error!("Run {} aborted: {}", run.summary.id, e);
            run.say(format!("\nFatal error: {}", e));
        }

        run.summary.finished_at = Utc::now();
        info!(
            "Run {} finished: {}/{} analyzed, {} failed{}",
            run.summary.id,
            run.summary.analyzed,
            run.summary.total,
            run.summary.failed,
            if run.summary.stopped { " (stopped)" } else { "" }
        );

        let summary = run.summary.clone();
        run.emit(ProgressEvent::Finished { summary: summary.clone() });
        summary
    }

    async fn analyze_folder(&self, dir: &Path, run: &mut RunState, stop: &StopFlag) -> Result<()> {
        run.say(format!("Starting folder analysis of '{}'...", dir.display()));

        let scan = &self.config.scan;
        let files = find_project_files(dir, &scan.extensions, &scan.exclude)?;
        if files.is_empty() {
            run.say("No files to analyze were found.");
            return Ok(());
        }

        run.say(format!("Found {} files. Grouping them into feature units...", files.len()));
        let units = group_by_feature(&files, &scan.strip_suffixes);
        let total = units.len();
        run.summary.total = total;
        run.say(format!("🎉 Starting critical risk analysis of {} feature units.", total));

        let Some(backend) = self.connect_backend(run) else {
            return Ok(());
        };
        let prompts = PromptBuilder::new(&self.config.prompts)?;

        let mut report = ReportWriter::create(&self.report_path(RunMode::Folder), RunMode::Folder)?;
        run.summary.report_path = Some(report.path().to_path_buf());

        for (i, unit) in units.iter().enumerate() {
            if !self.pace(i, run, stop).await {
                break;
            }

            run.say(format!("\n[{}/{}] Analyzing feature unit '{}'...", i + 1, total, unit.name));

            let combined = combine_sources(&unit.files);
            for (skipped, reason) in &combined.skipped {
                run.say(format!("Skipped unreadable file {}: {}", display_name(skipped), reason));
            }

            let result = match prompts.unit_prompt(&unit.name, &combined.text) {
                Ok(prompt) => backend.generate(&prompt).await,
                Err(e) => Err(e),
            };
            let body = run.record(result, &format!("feature unit '{}'", unit.name));
            report.write_unit(&unit.name, &body)?;
        }

        // A stop during the last model call is only visible here
        if stop.is_stopped() {
            run.mark_stopped();
        } else {
            run.say(format!(
                "\n\n🎉🎉🎉 Folder analysis complete! Check '{}'. 🎉🎉🎉",
                report.path().display()
            ));
        }

        Ok(())
    }

    async fn analyze_files(&self, files: &[PathBuf], run: &mut RunState, stop: &StopFlag) -> Result<()> {
        let total = files.len();
        run.summary.total = total;
        run.say(format!("Starting analysis of {} individual files...", total));

        let Some(backend) = self.connect_backend(run) else {
            return Ok(());
        };
        let prompts = PromptBuilder::new(&self.config.prompts)?;

        let mut report = ReportWriter::create(&self.report_path(RunMode::Files), RunMode::Files)?;
        run.summary.report_path = Some(report.path().to_path_buf());

        for (i, file) in files.iter().enumerate() {
            if !self.pace(i, run, stop).await {
                break;
            }

            let name = display_name(file);
            run.say(format!("\n[{}/{}] Analyzing file '{}'...", i + 1, total, name));

            let result = match std::fs::read_to_string(file) {
                Ok(code) => match prompts.file_prompt(&name, &code) {
                    Ok(prompt) => backend.generate(&prompt).await,
                    Err(e) => Err(e),
                },
                Err(e) => Err(e.into()),
            };
            let body = run.record(result, &format!("file '{}'", name));
            report.write_file(file, &body)?;
        }

        if stop.is_stopped() {
            run.mark_stopped();
        } else {
            run.say(format!(
                "\n\n🎉🎉🎉 File analysis complete! Check '{}'. 🎉🎉🎉",
                report.path().display()
            ));
        }

        Ok(())
    }

    /// Build the backend; a failure (usually a missing API key) ends the run quietly
    fn connect_backend(&self, run: &mut RunState) -> Option<Arc<dyn ModelBackend>> {
        match (self.connect)(&self.config.engine) {
            Ok(backend) => {
                debug!("Using model backend: {}", backend.name());
                Some(backend)
            }
            Err(e) => {
                run.say(format!("Error: {}", e));
                None
            }
        }
    }

    /// Check the stop flag and wait out the request delay before unit `index`.
    /// Returns false once the run has been stopped.
    async fn pace(&self, index: usize, run: &mut RunState, stop: &StopFlag) -> bool {
        let delay = self.config.engine.request_delay_ms;
        if index > 0 && delay > 0 && !stop.is_stopped() {
            tokio::select! {
                _ = tokio::time::sleep(Duration::from_millis(delay)) => {}
                _ = stop.stopped() => {}
            }
        }

        if stop.is_stopped() {
            run.mark_stopped();
            return false;
        }
        true
    }

    fn report_path(&self, mode: RunMode) -> PathBuf {
        if let Some(ref output) = self.output {
            return output.clone();
        }
        match mode {
            RunMode::Folder => PathBuf::from(&self.config.report.folder_output),
            RunMode::Files => PathBuf::from(&self.config.report.files_output),
        }
    }
}

struct RunState {
    events: mpsc::UnboundedSender<ProgressEvent>,
    summary: RunSummary,
}

impl RunState {
    fn emit(&self, event: ProgressEvent) {
        // Receiver gone means nobody is watching; the run still completes
        let _ = self.events.send(event);
    }

    fn say(&self, text: impl Into<String>) {
        let text = text.into();
        debug!("{}", text.trim());
        self.emit(ProgressEvent::Line { text });
    }

    fn mark_stopped(&mut self) {
        if !self.summary.stopped {
            self.summary.stopped = true;
            self.say("\n!!! Analysis stopped !!!");
        }
    }

    /// Count the outcome and turn it into report text
    fn record(&mut self, result: Result<String>, what: &str) -> String {
        match result {
            Ok(text) => {
                self.summary.analyzed += 1;
                self.say("✅ Analysis complete.");
                text
            }
            Err(e) => {
                self.summary.failed += 1;
                let text = format!("Error: analysis of {} failed - {}", what, e);
                self.say(text.clone());
                text
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::RiskscanError;
    use async_trait::async_trait;
    use std::sync::Mutex;
    use tempfile::TempDir;

    /// Records prompts; fails any prompt containing `FAIL`
    struct FakeModel {
        prompts: Mutex<Vec<String>>,
        stop_after_first: Option<StopFlag>,
    }

    #[async_trait]
    impl ModelBackend for FakeModel {
        fn name(&self) -> &str {
            "fake"
        }

        async fn generate(&self, prompt: &str) -> Result<String> {
            self.prompts.lock().unwrap().push(prompt.to_string());
            if let Some(ref stop) = self.stop_after_first {
                stop.stop();
            }
            if prompt.contains("FAIL") {
                return Err(RiskscanError::Api { status: 500, message: "boom".to_string() });
            }
            Ok("[CRITICAL] something bad".to_string())
        }
    }

    fn fake(stop_after_first: Option<StopFlag>) -> Arc<FakeModel> {
        Arc::new(FakeModel { prompts: Mutex::new(Vec::new()), stop_after_first })
    }

    fn factory(model: Arc<FakeModel>) -> BackendFactory {
        Arc::new(move |_: &EngineConfig| Ok(model.clone() as Arc<dyn ModelBackend>))
    }

    fn test_config(dir: &Path) -> AppConfig {
        let mut config = AppConfig::default();
        config.engine.request_delay_ms = 0;
        config.prompts.unit = "UNIT {{ name }}:{{ code }}".to_string();
        config.prompts.file = "FILE {{ name }}:{{ code }}".to_string();
        config.report.folder_output = dir.join("folder.md").display().to_string();
        config.report.files_output = dir.join("files.md").display().to_string();
        config
    }

    fn project(dir: &Path) -> PathBuf {
        let src = dir.join("project");
        std::fs::create_dir_all(src.join("web")).unwrap();
        std::fs::write(src.join("web/UserController.java"), "class UserController {}").unwrap();
        std::fs::write(src.join("UserService.java"), "class UserService {}").unwrap();
        std::fs::write(src.join("OrderMapper.xml"), "<FAIL/>").unwrap();
        std::fs::write(src.join("notes.txt"), "ignored").unwrap();
        src
    }

    async fn run(pipeline: &Pipeline, job: AnalysisJob, stop: StopFlag) -> (RunSummary, Vec<ProgressEvent>) {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let summary = pipeline.run(job, tx, stop).await;
        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        (summary, events)
    }

    fn lines(events: &[ProgressEvent]) -> Vec<String> {
        events.iter().filter_map(|e| match e {
            ProgressEvent::Line { text } => Some(text.clone()),
            _ => None,
        }).collect()
    }

    #[tokio::test]
    async fn test_folder_run_writes_every_unit() {
        let dir = TempDir::new().unwrap();
        let src = project(dir.path());
        let model = fake(None);
        let pipeline = Pipeline::with_backend(test_config(dir.path()), factory(model.clone()));

        let (summary, events) = run(&pipeline, AnalysisJob::Folder(src), StopFlag::new()).await;

        assert_eq!(summary.mode, RunMode::Folder);
        assert_eq!(summary.total, 2);
        assert_eq!(summary.analyzed, 1);
        assert_eq!(summary.failed, 1);
        assert!(!summary.stopped);

        let prompts = model.prompts.lock().unwrap();
        assert_eq!(prompts.len(), 2);
        assert!(prompts[0].starts_with("UNIT Order:"));
        assert!(prompts[1].starts_with("UNIT User:"));
        assert!(prompts[1].contains("--- File: UserService.java ---"));
        assert!(prompts[1].contains("--- File: UserController.java ---"));

        let report = std::fs::read_to_string(dir.path().join("folder.md")).unwrap();
        assert!(report.starts_with("# AI Code Analysis Report (Folder)"));
        assert!(report.contains("## 💎 Feature Unit: Order\n\nError: analysis of feature unit 'Order' failed"));
        assert!(report.contains("## 💎 Feature Unit: User\n\n[CRITICAL] something bad"));

        assert!(matches!(events.first(), Some(ProgressEvent::Started { .. })));
        assert!(matches!(events.last(), Some(ProgressEvent::Finished { .. })));
        let lines = lines(&events);
        assert!(lines.iter().any(|l| l.contains("[1/2] Analyzing feature unit 'Order'")));
        assert!(lines.iter().any(|l| l.contains("Folder analysis complete")));
    }

    #[tokio::test]
    async fn test_empty_folder_finishes_without_report() {
        let dir = TempDir::new().unwrap();
        let empty = dir.path().join("empty");
        std::fs::create_dir(&empty).unwrap();
        let model = fake(None);
        let pipeline = Pipeline::with_backend(test_config(dir.path()), factory(model.clone()));

        let (summary, events) = run(&pipeline, AnalysisJob::Folder(empty), StopFlag::new()).await;

        assert_eq!(summary.total, 0);
        assert!(summary.report_path.is_none());
        assert!(!dir.path().join("folder.md").exists());
        assert!(lines(&events).iter().any(|l| l == "No files to analyze were found."));
        assert!(matches!(events.last(), Some(ProgressEvent::Finished { .. })));
        assert!(model.prompts.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_missing_key_ends_run_before_report() {
        let dir = TempDir::new().unwrap();
        let src = project(dir.path());
        let connect: BackendFactory = Arc::new(|engine: &EngineConfig| {
            Err(RiskscanError::MissingApiKey(engine.api_key_env.clone()))
        });
        let pipeline = Pipeline::with_backend(test_config(dir.path()), connect);

        let (summary, events) = run(&pipeline, AnalysisJob::Folder(src), StopFlag::new()).await;

        assert_eq!(summary.analyzed, 0);
        assert!(summary.report_path.is_none());
        assert!(lines(&events).iter().any(|l| l.starts_with("Error: API key not found: set GOOGLE_API_KEY")));
        assert!(matches!(events.last(), Some(ProgressEvent::Finished { .. })));
    }

    #[tokio::test]
    async fn test_missing_folder_is_fatal_but_finishes() {
        let dir = TempDir::new().unwrap();
        let pipeline = Pipeline::with_backend(test_config(dir.path()), factory(fake(None)));

        let (_, events) = run(&pipeline, AnalysisJob::Folder(dir.path().join("nope")), StopFlag::new()).await;

        assert!(lines(&events).iter().any(|l| l.contains("Fatal error:")));
        assert!(matches!(events.last(), Some(ProgressEvent::Finished { .. })));
    }

    #[tokio::test]
    async fn test_stop_keeps_partial_report() {
        let dir = TempDir::new().unwrap();
        let src = project(dir.path());
        let stop = StopFlag::new();
        let model = fake(Some(stop.clone()));
        let pipeline = Pipeline::with_backend(test_config(dir.path()), factory(model.clone()));

        let (summary, events) = run(&pipeline, AnalysisJob::Folder(src), stop).await;

        assert!(summary.stopped);
        assert_eq!(model.prompts.lock().unwrap().len(), 1);
        let lines = lines(&events);
        assert!(lines.iter().any(|l| l.contains("Analysis stopped")));
        assert!(!lines.iter().any(|l| l.contains("analysis complete!")));

        let report = std::fs::read_to_string(dir.path().join("folder.md")).unwrap();
        assert!(report.contains("Feature Unit: Order"));
        assert!(!report.contains("Feature Unit: User"));
    }

    #[tokio::test]
    async fn test_stop_during_last_unit_is_recorded() {
        let dir = TempDir::new().unwrap();
        let src = dir.path().join("single");
        std::fs::create_dir_all(&src).unwrap();
        std::fs::write(src.join("UserController.java"), "class UserController {}").unwrap();

        let stop = StopFlag::new();
        let model = fake(Some(stop.clone()));
        let pipeline = Pipeline::with_backend(test_config(dir.path()), factory(model.clone()));

        let (summary, events) = run(&pipeline, AnalysisJob::Folder(src), stop).await;

        assert_eq!(summary.total, 1);
        assert_eq!(summary.analyzed, 1);
        assert!(summary.stopped);
        let lines = lines(&events);
        assert_eq!(lines.iter().filter(|l| l.contains("Analysis stopped")).count(), 1);
        assert!(!lines.iter().any(|l| l.contains("analysis complete!")));

        let report = std::fs::read_to_string(dir.path().join("folder.md")).unwrap();
        assert!(report.contains("## 💎 Feature Unit: User\n\n[CRITICAL] something bad"));
    }

    #[tokio::test]
    async fn test_stop_during_last_file_is_recorded() {
        let dir = TempDir::new().unwrap();
        let file = dir.path().join("Login.jsp");
        std::fs::write(&file, "<%= x %>").unwrap();

        let stop = StopFlag::new();
        let pipeline = Pipeline::with_backend(test_config(dir.path()), factory(fake(Some(stop.clone()))));

        let (summary, events) = run(&pipeline, AnalysisJob::Files(vec![file]), stop).await;

        assert!(summary.stopped);
        assert_eq!(summary.analyzed, 1);
        assert!(!lines(&events).iter().any(|l| l.contains("File analysis complete")));
    }

    #[tokio::test]
    async fn test_stop_interrupts_pacing_delay() {
        let dir = TempDir::new().unwrap();
        let src = project(dir.path());
        let stop = StopFlag::new();
        let mut config = test_config(dir.path());
        config.engine.request_delay_ms = 60_000;
        let model = fake(None);
        let pipeline = Pipeline::with_backend(config, factory(model.clone()));

        let stopper = stop.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            stopper.stop();
        });

        let summary = tokio::time::timeout(
            Duration::from_secs(5),
            run(&pipeline, AnalysisJob::Folder(src), stop),
        ).await.expect("stop should cut the delay short").0;

        assert!(summary.stopped);
        assert_eq!(model.prompts.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_files_run_reports_each_file() {
        let dir = TempDir::new().unwrap();
        let a = dir.path().join("Login.jsp");
        std::fs::write(&a, "<%= request.getParameter(\"q\") %>").unwrap();
        let missing = dir.path().join("Gone.java");
        let model = fake(None);
        let pipeline = Pipeline::with_backend(test_config(dir.path()), factory(model.clone()))
            .with_output(Some(dir.path().join("custom.md")));

        let (summary, events) = run(
            &pipeline,
            AnalysisJob::Files(vec![a.clone(), missing.clone()]),
            StopFlag::new(),
        ).await;

        assert_eq!(summary.mode, RunMode::Files);
        assert_eq!(summary.total, 2);
        assert_eq!(summary.analyzed, 1);
        assert_eq!(summary.failed, 1);
        assert_eq!(summary.report_path, Some(dir.path().join("custom.md")));

        let prompts = model.prompts.lock().unwrap();
        assert_eq!(prompts.len(), 1);
        assert!(prompts[0].starts_with("FILE Login.jsp:"));

        let report = std::fs::read_to_string(dir.path().join("custom.md")).unwrap();
        assert!(report.starts_with("# AI Code Analysis Report (Files)"));
        assert!(report.contains(&format!("## 📄 File: {}\n\n[CRITICAL]", a.display())));
        assert!(report.contains(&format!("## 📄 File: {}\n\nError: analysis of file 'Gone.java' failed", missing.display())));
        assert!(lines(&events).iter().any(|l| l.contains("File analysis complete")));
    }

    #[test]
    fn test_progress_event_wire_format() {
        let line = serde_json::to_value(ProgressEvent::Line { text: "hi".to_string() }).unwrap();
        assert_eq!(line, serde_json::json!({"type": "line", "text": "hi"}));

        let started = serde_json::to_value(ProgressEvent::Started {
            mode: RunMode::Files,
            target: "2 files".to_string(),
        }).unwrap();
        assert_eq!(started["type"], "started");
        assert_eq!(started["mode"], "files");
    }

    #[test]
    fn test_stop_flag_is_shared() {
        let stop = StopFlag::new();
        let other = stop.clone();
        assert!(!other.is_stopped());
        stop.stop();
        assert!(other.is_stopped());
    }
}
