// Render coordinator: the daemon's single-owner "current render" slot
//
// Idle    -- update --> Running(job)
// Running -- update --> cancel + reap job, then handle the update as if Idle
// Running -- completion of the current job --> emit output, Idle
//
// Completions travel over a queue tagged with the job id. One that belongs to a
// job already superseded is ignored, so stale output can never be emitted.

use crate::modeline::codec::EnvironmentSnapshot;
use crate::modeline::render::{
    strip_zero_width_markers, JobId, JobOutcome, RenderJob, RenderRequest, Renderer,
};
use crossterm::queue;
use crossterm::style::Print;
use crossterm::terminal::{Clear, ClearType};
use std::io::Write;
use tokio::sync::mpsc;

/// Observable coordinator state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CoordinatorState {
    Idle,
    Running { job: JobId, pgid: Option<i32> },
}

pub struct Coordinator<W: Write> {
    renderer: Renderer,
    out: W,
    current: Option<RenderJob>,
    next_job: JobId,
    completions_tx: mpsc::UnboundedSender<JobOutcome>,
    completions_rx: mpsc::UnboundedReceiver<JobOutcome>,
}

impl<W: Write> Coordinator<W> {
    /// `out` receives rendered status lines (normally the daemon's stdout)
    pub fn new(renderer: Renderer, out: W) -> Self {
        let (completions_tx, completions_rx) = mpsc::unbounded_channel();
        Self {
            renderer,
            out,
            current: None,
            next_job: 1,
            completions_tx,
            completions_rx,
        }
    }

    pub fn state(&self) -> CoordinatorState {
        match &self.current {
            Some(job) => CoordinatorState::Running {
                job: job.id(),
                pgid: job.pgid(),
            },
            None => CoordinatorState::Idle,
        }
    }

    /// Handle a freshly received update
    ///
    /// Any in-flight render is killed and reaped before the new one starts.
    pub async fn handle_update(&mut self, snapshot: EnvironmentSnapshot) {
        self.cancel_current().await;

        let request = match RenderRequest::from_snapshot(&snapshot) {
            Ok(request) => request,
            Err(e) => {
                tracing::error!(error = %e, "update rejected");
                return;
            }
        };

        let id = self.next_job;
        self.next_job += 1;

        match RenderJob::spawn(
            id,
            &self.renderer,
            &request,
            &snapshot,
            self.completions_tx.clone(),
        ) {
            Ok(job) => self.current = Some(job),
            Err(e) => tracing::error!(job = id, error = %e, "update abandoned"),
        }
    }

    /// Wait for the next job outcome
    ///
    /// Cancel safe, suitable for `tokio::select!`. Never resolves to `None`
    /// because the coordinator holds a sender itself.
    pub async fn next_outcome(&mut self) -> Option<JobOutcome> {
        self.completions_rx.recv().await
    }

    /// Apply a job outcome; outcomes of superseded jobs are dropped
    pub fn handle_outcome(&mut self, outcome: JobOutcome) -> std::io::Result<()> {
        let current = self.current.as_ref().map(RenderJob::id);
        if current != Some(outcome.job()) {
            tracing::debug!(job = outcome.job(), current = ?current, "ignoring outcome of superseded job");
            return Ok(());
        }
        // The job task has finished with the renderer reaped; release the slot
        self.current = None;

        match outcome {
            JobOutcome::Completed { output, .. } => self.emit(&output),
            JobOutcome::TimedOut { job } => {
                tracing::error!(job, "render timed out, keeping previous status line");
                Ok(())
            }
            JobOutcome::Failed { job, error } => {
                tracing::error!(job, error = %error, "render failed");
                Ok(())
            }
        }
    }

    /// Kill and reap the current render, if any
    pub async fn cancel_current(&mut self) {
        if let Some(job) = self.current.take() {
            tracing::debug!(job = job.id(), "superseding running render");
            job.cancel().await;
        }
    }

    /// Clear the line, return to column one, write the cleaned output
    fn emit(&mut self, raw: &[u8]) -> std::io::Result<()> {
        let cleaned = strip_zero_width_markers(raw);
        queue!(self.out, Clear(ClearType::CurrentLine), Print('\r'))?;
        self.out.write_all(&cleaned)?;
        self.out.flush()
    }

    pub fn into_output(self) -> W {
        self.out
    }

    pub fn output(&self) -> &W {
        &self.out
    }
}
