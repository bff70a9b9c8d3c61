//! Sequenced reveal controller: one oracle run at a time, revealed in strict stage order.

mod run;
mod state;

use std::{
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    time::Duration,
};

use shared::domain::RunId;
use tokio::{
    sync::{broadcast, watch, Mutex},
    task::JoinHandle,
};
use tracing::info;

pub use state::{
    interleave_glyphs, RevealStage, RevealUpdate, RevealView, RunPhase, VisibleGrid,
    GLYPH_SEPARATOR, STATUS_DECODING, STATUS_DECRYPTING, STATUS_SPOKEN, STATUS_SUBMITTED,
};

use crate::{
    audio::{AudioDeck, AudioSink},
    error::OracleError,
    scheduler::RevealTiming,
    transport::OracleTransport,
    verification::VerificationGate,
};

pub const EMPTY_QUERY: &str = "You must pose a question to the ether.";
pub const VERIFY_FIRST: &str = "Please complete the captcha verification.";
pub const DEFAULT_STREAM_IDLE_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, Copy)]
pub struct ControllerOptions {
    pub timing: RevealTiming,
    /// `None` waits on a silent stream forever.
    pub stream_idle_timeout: Option<Duration>,
}

impl Default for ControllerOptions {
    fn default() -> Self {
        Self {
            timing: RevealTiming::default(),
            stream_idle_timeout: Some(DEFAULT_STREAM_IDLE_TIMEOUT),
        }
    }
}

struct ActiveRun {
    run: RunId,
    task: JoinHandle<()>,
}

pub struct RunController {
    transport: Arc<dyn OracleTransport>,
    verification: VerificationGate,
    audio: AudioDeck,
    options: ControllerOptions,
    view: Arc<watch::Sender<RevealView>>,
    updates: broadcast::Sender<RevealUpdate>,
    active: Mutex<Option<ActiveRun>>,
    last_run: AtomicU64,
}

impl RunController {
    /// Mounts the controller: the ambient track starts here and stops on
    /// [`RunController::shutdown`] or drop.
    pub fn new(
        transport: Arc<dyn OracleTransport>,
        verification: VerificationGate,
        audio: Arc<dyn AudioSink>,
        options: ControllerOptions,
    ) -> Self {
        let (view, _) = watch::channel(RevealView::default());
        let (updates, _) = broadcast::channel(256);
        let audio = AudioDeck::new(audio);
        audio.mount();
        Self {
            transport,
            verification,
            audio,
            options,
            view: Arc::new(view),
            updates,
            active: Mutex::new(None),
            last_run: AtomicU64::new(0),
        }
    }

    pub fn verification(&self) -> &VerificationGate {
        &self.verification
    }

    pub fn view(&self) -> watch::Receiver<RevealView> {
        self.view.subscribe()
    }

    pub fn snapshot(&self) -> RevealView {
        self.view.borrow().clone()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<RevealUpdate> {
        self.updates.subscribe()
    }

    /// Cancels whatever is in flight and starts a new run for `query`.
    pub async fn submit(&self, query: &str) -> Result<RunId, OracleError> {
        let query = query.trim();
        if query.is_empty() {
            return Err(self.reject(EMPTY_QUERY));
        }
        let Some(token) = self.verification.token() else {
            self.verification.request();
            let message = self.verification.last_error().unwrap_or(VERIFY_FIRST);
            return Err(self.reject(message));
        };

        let mut active = self.active.lock().await;
        if let Some(previous) = active.take() {
            previous.task.abort();
            info!(run_id = previous.run.0, "cancelled superseded run");
        }

        let run = RunId(self.last_run.fetch_add(1, Ordering::SeqCst) + 1);
        self.view.send_replace(RevealView::submitted(run));
        let _ = self.updates.send(RevealUpdate::RunStarted { run });
        info!(run_id = run.0, query_len = query.len(), "oracle run submitted");

        let task = tokio::spawn(run::drive(run::RunContext {
            run,
            query: query.to_string(),
            token,
            transport: Arc::clone(&self.transport),
            timing: self.options.timing,
            idle_timeout: self.options.stream_idle_timeout,
            view: Arc::clone(&self.view),
            updates: self.updates.clone(),
            audio: self.audio.clone(),
            verification: self.verification.clone(),
        }));
        *active = Some(ActiveRun { run, task });
        Ok(run)
    }

    /// Abandons the in-flight run, its stream read and every pending reveal.
    pub async fn cancel(&self) {
        if let Some(previous) = self.active.lock().await.take() {
            previous.task.abort();
            info!(run_id = previous.run.0, "run cancelled");
        }
        self.view.send_replace(RevealView::default());
    }

    /// Teardown: cancels the run and unmounts audio.
    pub async fn shutdown(&self) {
        self.cancel().await;
        self.audio.unmount();
    }

    /// Resolves once the current run is done or failed.
    pub async fn settled(&self) -> RevealView {
        let mut rx = self.view.subscribe();
        let result = rx
            .wait_for(|view| view.run.is_none() || view.phase.is_terminal())
            .await
            .map(|view| view.clone());
        match result {
            Ok(view) => view,
            Err(_) => self.snapshot(),
        }
    }

    fn reject(&self, message: &str) -> OracleError {
        self.view
            .send_modify(|view| view.error = Some(message.to_string()));
        OracleError::Validation(message.to_string())
    }
}

impl Drop for RunController {
    fn drop(&mut self) {
        if let Some(active) = self.active.get_mut().take() {
            active.task.abort();
        }
        self.audio.unmount();
    }
}

#[cfg(test)]
#[path = "../tests/controller_tests.rs"]
mod tests;
