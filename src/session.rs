// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025 Jonathan D. A. Jewell <hyperpolymath>

//! Interactive session state behind the dashboard
//!
//! A [`Session`] owns the file selection, the log shown to the user and the
//! single analysis worker. At most one run is active; starting clears the
//! log, and the run's `Finished` event returns the session to idle.

use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::{broadcast, mpsc};
use tracing::{info, warn};

use crate::history::RunHistory;
use crate::pipeline::{AnalysisJob, Pipeline, ProgressEvent, StopFlag};
use crate::{Result, RiskscanError};

/// Ordered list of files picked for individual analysis, without duplicates
#[derive(Debug, Default, Clone)]
pub struct FileSelection {
    paths: Vec<PathBuf>,
}

impl FileSelection {
    /// Add paths not already selected; returns how many were added
    pub fn add<I: IntoIterator<Item = PathBuf>>(&mut self, paths: I) -> usize {
        let before = self.paths.len();
        for path in paths {
            if !self.paths.contains(&path) {
                self.paths.push(path);
            }
        }
        self.paths.len() - before
    }

    /// Remove entries by position; unknown positions are ignored
    pub fn remove(&mut self, indices: &[usize]) -> usize {
        let mut sorted = indices.to_vec();
        sorted.sort_unstable();
        sorted.dedup();

        let mut removed = 0;
        for i in sorted.into_iter().rev() {
            if i < self.paths.len() {
                self.paths.remove(i);
                removed += 1;
            }
        }
        removed
    }

    pub fn clear(&mut self) {
        self.paths.clear();
    }

    pub fn paths(&self) -> &[PathBuf] {
        &self.paths
    }

    pub fn is_empty(&self) -> bool {
        self.paths.is_empty()
    }
}

/// Shared handle to the interactive session
#[derive(Clone)]
pub struct Session {
    inner: Arc<Inner>,
}

struct Inner {
    pipeline: Pipeline,
    history: RunHistory,
    log_limit: usize,
    selection: Mutex<FileSelection>,
    log: Mutex<VecDeque<String>>,
    active: Mutex<Option<StopFlag>>,
    events: broadcast::Sender<ProgressEvent>,
}

impl Session {
    pub fn new(pipeline: Pipeline, history: RunHistory, log_limit: usize) -> Self {
        let (events, _) = broadcast::channel(256);
        Self {
            inner: Arc::new(Inner {
                pipeline,
                history,
                log_limit: log_limit.max(1),
                selection: Mutex::new(FileSelection::default()),
                log: Mutex::new(VecDeque::new()),
                active: Mutex::new(None),
                events,
            }),
        }
    }

    /// Analyze a whole project folder
    pub fn start_folder(&self, path: &Path) -> Result<()> {
        if !path.is_dir() {
            return Err(RiskscanError::InvalidInput(format!(
                "'{}' is not a valid folder path",
                path.display()
            )));
        }
        self.begin(AnalysisJob::Folder(path.to_path_buf()))
    }

    /// Analyze every selected file
    pub fn start_files(&self) -> Result<()> {
        let files = {
            let selection = lock(&self.inner.selection);
            if selection.is_empty() {
                return Err(RiskscanError::InvalidInput(
                    "add at least one file to analyze".to_string(),
                ));
            }
            selection.paths().to_vec()
        };
        self.begin(AnalysisJob::Files(files))
    }

    /// Ask the active run to stop; returns false when idle
    pub fn stop(&self) -> bool {
        match lock(&self.inner.active).as_ref() {
            Some(stop) => {
                info!("Stop requested");
                stop.stop();
                true
            }
            None => false,
        }
    }

    pub fn is_running(&self) -> bool {
        lock(&self.inner.active).is_some()
    }

    /// Current log and a receiver for everything after it
    pub fn subscribe(&self) -> (Vec<String>, broadcast::Receiver<ProgressEvent>) {
        let log = lock(&self.inner.log);
        let rx = self.inner.events.subscribe();
        (log.iter().cloned().collect(), rx)
    }

    pub fn log_lines(&self) -> Vec<String> {
        lock(&self.inner.log).iter().cloned().collect()
    }

    pub fn history(&self) -> &RunHistory {
        &self.inner.history
    }

    pub fn selection(&self) -> FileSelection {
        lock(&self.inner.selection).clone()
    }

    pub fn add_files<I: IntoIterator<Item = PathBuf>>(&self, paths: I) -> usize {
        lock(&self.inner.selection).add(paths)
    }

    pub fn remove_files(&self, indices: &[usize]) -> usize {
        lock(&self.inner.selection).remove(indices)
    }

    pub fn clear_files(&self) {
        lock(&self.inner.selection).clear();
    }

    fn begin(&self, job: AnalysisJob) -> Result<()> {
        let stop = {
            let mut active = lock(&self.inner.active);
            if active.is_some() {
                return Err(RiskscanError::Busy);
            }
            let stop = StopFlag::new();
            *active = Some(stop.clone());
            stop
        };

        let (tx, mut rx) = mpsc::unbounded_channel();
        self.inner.pipeline.clone().spawn(job, tx, stop);

        let session = self.clone();
        tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                session.dispatch(event);
            }
        });

        Ok(())
    }

    fn dispatch(&self, event: ProgressEvent) {
        // History is on disk before anyone hears the run finished
        if let ProgressEvent::Finished { summary } = &event {
            if let Err(e) = self.inner.history.append(summary) {
                warn!("Failed to record run history: {}", e);
            }
        }

        // Log update and broadcast happen under one lock so `subscribe` never
        // sees a line twice or misses one
        let mut log = lock(&self.inner.log);
        match &event {
            ProgressEvent::Started { .. } => log.clear(),
            ProgressEvent::Line { text } => {
                if log.len() >= self.inner.log_limit {
                    log.pop_front();
                }
                log.push_back(text.clone());
            }
            ProgressEvent::Finished { .. } => *lock(&self.inner.active) = None,
        }
        // No subscribers is fine
        let _ = self.inner.events.send(event);
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
