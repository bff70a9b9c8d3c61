//! Per-run driver: the only writer of a run's visible state.

use std::{sync::Arc, time::Duration};

use shared::{
    domain::RunId,
    protocol::{Grid, Prophecy, StreamEvent, GRID_SIZE},
};
use tokio::sync::{broadcast, mpsc, watch};
use tracing::{debug, info, warn};

use super::state::{
    interleave_glyphs, RevealStage, RevealUpdate, RevealView, RunPhase, STATUS_DECODING,
    STATUS_DECRYPTING, STATUS_SPOKEN,
};
use crate::{
    audio::AudioDeck,
    error::OracleError,
    scheduler::{RevealScheduler, RevealTiming, ScheduledStep},
    stream_reader::StreamReader,
    transport::OracleTransport,
    verification::VerificationGate,
};

pub(crate) const SILENT_BEFORE_PROPHECY: &str =
    "The oracle fell silent before the prophecy arrived.";
pub(crate) const STAGES_MISSING: &str =
    "The oracle fell silent before the reveal was complete.";

#[derive(Debug)]
pub(crate) enum RunInput {
    Event(StreamEvent),
    StreamFailed(OracleError),
    StreamClosed,
    Step(ScheduledStep),
}

impl From<ScheduledStep> for RunInput {
    fn from(step: ScheduledStep) -> Self {
        RunInput::Step(step)
    }
}

pub(crate) struct RunContext {
    pub run: RunId,
    pub query: String,
    pub token: String,
    pub transport: Arc<dyn OracleTransport>,
    pub timing: RevealTiming,
    pub idle_timeout: Option<Duration>,
    pub view: Arc<watch::Sender<RevealView>>,
    pub updates: broadcast::Sender<RevealUpdate>,
    pub audio: AudioDeck,
    pub verification: VerificationGate,
}

pub(crate) async fn drive(ctx: RunContext) {
    RunDriver::new(ctx).run().await;
}

async fn read_stream(mut reader: StreamReader, tx: mpsc::UnboundedSender<RunInput>) {
    loop {
        let input = match reader.next_event().await {
            Ok(Some(event)) => RunInput::Event(event),
            Ok(None) => {
                let _ = tx.send(RunInput::StreamClosed);
                return;
            }
            Err(err) => {
                let _ = tx.send(RunInput::StreamFailed(err));
                return;
            }
        };
        if tx.send(input).is_err() {
            return;
        }
    }
}

struct RunDriver {
    ctx: RunContext,
    phase: RunPhase,
    scheduler: RevealScheduler,
    tx: mpsc::UnboundedSender<RunInput>,
    rx: mpsc::UnboundedReceiver<RunInput>,
    grid: Option<Grid>,
    glyphs: Vec<String>,
    pending_consonants: Option<Vec<String>>,
    pending_prophecy: Option<Prophecy>,
    prophecy_received: bool,
}

impl RunDriver {
    fn new(ctx: RunContext) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            ctx,
            phase: RunPhase::Idle,
            scheduler: RevealScheduler::new(),
            tx,
            rx,
            grid: None,
            glyphs: Vec::new(),
            pending_consonants: None,
            pending_prophecy: None,
            prophecy_received: false,
        }
    }

    async fn run(mut self) {
        let run_id = self.ctx.run.0;
        let stream = match self
            .ctx
            .transport
            .open(&self.ctx.query, &self.ctx.token)
            .await
        {
            Ok(stream) => stream,
            Err(err) => {
                self.fail(err);
                return;
            }
        };
        info!(run_id, "oracle request accepted");
        self.set_phase(RunPhase::AwaitingGrid);

        let mut reader = StreamReader::new(stream);
        if let Some(limit) = self.ctx.idle_timeout {
            reader = reader.with_idle_timeout(limit);
        }
        self.scheduler
            .track(tokio::spawn(read_stream(reader, self.tx.clone())));

        while let Some(input) = self.rx.recv().await {
            if !self.is_current() {
                debug!(run_id, "run superseded; driver stopping");
                break;
            }
            if let Err(err) = self.handle(input) {
                self.fail(err);
            }
            if self.phase.is_terminal() {
                break;
            }
        }
        self.scheduler.cancel_all();
    }

    fn handle(&mut self, input: RunInput) -> Result<(), OracleError> {
        match input {
            RunInput::Event(event) => self.on_event(event),
            RunInput::StreamFailed(err) => Err(err),
            RunInput::StreamClosed => {
                debug!(run_id = self.ctx.run.0, "oracle stream closed");
                if !self.prophecy_received {
                    Err(OracleError::Transport(SILENT_BEFORE_PROPHECY.to_string()))
                } else if !self.stages_received() {
                    Err(OracleError::Transport(STAGES_MISSING.to_string()))
                } else {
                    Ok(())
                }
            }
            RunInput::Step(step) => {
                self.on_step(step);
                Ok(())
            }
        }
    }

    fn on_event(&mut self, event: StreamEvent) -> Result<(), OracleError> {
        debug!(run_id = self.ctx.run.0, step = event.step(), phase = self.phase.as_str(), "stream event");
        match event {
            StreamEvent::GridCalculated { grid } => {
                if self.grid.is_some() || self.phase != RunPhase::AwaitingGrid {
                    warn!(run_id = self.ctx.run.0, "duplicate grid ignored");
                    return Ok(());
                }
                self.grid = Some(grid);
                self.begin_grid();
            }
            StreamEvent::ConsonantsDerived { consonants } => {
                if self.pending_consonants.is_some() || self.phase_is_past(RunPhase::AwaitingConsonants) {
                    warn!(run_id = self.ctx.run.0, "duplicate consonants ignored");
                    return Ok(());
                }
                if self.phase == RunPhase::AwaitingConsonants {
                    self.begin_glyphs(&consonants);
                } else {
                    self.pending_consonants = Some(consonants);
                }
            }
            StreamEvent::ProphecyGenerated(prophecy) => {
                if self.prophecy_received {
                    warn!(run_id = self.ctx.run.0, "duplicate prophecy ignored");
                    return Ok(());
                }
                self.prophecy_received = true;
                self.pending_prophecy = Some(prophecy);
                self.promote_prophecy();
            }
            StreamEvent::Error { message } => return Err(OracleError::Upstream(message)),
        }
        Ok(())
    }

    fn on_step(&mut self, step: ScheduledStep) {
        match step {
            ScheduledStep::Revealed {
                stage: RevealStage::Grid,
                index,
            } => self.reveal_cell(index),
            ScheduledStep::Revealed {
                stage: RevealStage::Consonants,
                index,
            } => self.reveal_glyph(index),
            ScheduledStep::Settled(RevealStage::Grid) => {
                self.set_phase(RunPhase::AwaitingConsonants);
                if let Some(consonants) = self.pending_consonants.take() {
                    self.begin_glyphs(&consonants);
                }
            }
            ScheduledStep::Settled(RevealStage::Consonants) => {
                self.set_phase(RunPhase::AwaitingProphecy);
                self.set_status(STATUS_DECRYPTING);
                self.promote_prophecy();
            }
            ScheduledStep::Settled(RevealStage::Prophecy) => {
                self.set_phase(RunPhase::Done);
                info!(run_id = self.ctx.run.0, "reveal complete");
                self.emit(RevealUpdate::Completed { run: self.ctx.run });
            }
            other => debug!(?other, "step without a reveal target"),
        }
    }

    fn begin_grid(&mut self) {
        self.set_phase(RunPhase::RevealingGrid);
        self.update_view(|view| view.stage = RevealStage::Grid);
        self.scheduler
            .schedule(self.ctx.timing.grid_plan(), self.tx.clone());
    }

    fn begin_glyphs(&mut self, consonants: &[String]) {
        self.glyphs = interleave_glyphs(consonants);
        let glyphs = self.glyphs.clone();
        self.set_phase(RunPhase::RevealingConsonants);
        self.update_view(|view| {
            view.stage = RevealStage::Consonants;
            view.glyphs = glyphs;
            view.visible_glyphs = 0;
        });
        self.set_status(STATUS_DECODING);
        self.scheduler
            .schedule(self.ctx.timing.glyph_plan(self.glyphs.len()), self.tx.clone());
    }

    /// The prophecy only shows once the glyph reveal has settled.
    fn promote_prophecy(&mut self) {
        if self.phase != RunPhase::AwaitingProphecy {
            return;
        }
        let Some(prophecy) = self.pending_prophecy.take() else {
            return;
        };
        self.set_phase(RunPhase::RevealingProphecy);
        let shown = prophecy.clone();
        self.update_view(|view| {
            view.stage = RevealStage::Prophecy;
            view.prophecy = Some(shown);
            view.loading = false;
        });
        self.set_status(STATUS_SPOKEN);
        self.emit(RevealUpdate::ProphecyRevealed {
            run: self.ctx.run,
            prophecy,
        });
        self.scheduler
            .schedule(self.ctx.timing.prophecy_plan(), self.tx.clone());
    }

    fn reveal_cell(&mut self, index: usize) {
        let Some(grid) = &self.grid else {
            return;
        };
        let (row, col) = (index / GRID_SIZE, index % GRID_SIZE);
        let Some(value) = grid.get(row).and_then(|cells| cells.get(col)).cloned() else {
            return;
        };
        let shown = value.clone();
        if self.update_view(|view| view.grid[row][col] = Some(shown)) {
            self.ctx.audio.cue();
            self.emit(RevealUpdate::CellRevealed {
                run: self.ctx.run,
                row,
                col,
                value,
            });
        }
    }

    fn reveal_glyph(&mut self, index: usize) {
        let Some(glyph) = self.glyphs.get(index).cloned() else {
            return;
        };
        let visible = index + 1;
        if self.update_view(|view| view.visible_glyphs = visible) {
            self.ctx.audio.cue();
            self.emit(RevealUpdate::GlyphRevealed {
                run: self.ctx.run,
                glyph,
                visible,
            });
        }
    }

    /// Halts scheduling and leaves whatever was already revealed on screen.
    fn fail(&mut self, err: OracleError) {
        if self.phase.is_terminal() {
            return;
        }
        warn!(run_id = self.ctx.run.0, kind = ?err.kind(), error = %err, "oracle run failed");
        self.scheduler.cancel_all();
        self.set_phase(RunPhase::Failed);
        let message = err.to_string();
        self.update_view(|view| {
            view.loading = false;
            view.error = Some(message);
        });
        if err.requires_reverification() && self.is_current() {
            self.ctx.verification.invalidate();
        }
        self.emit(RevealUpdate::Failed {
            run: self.ctx.run,
            error: err,
        });
    }

    /// Grid and consonants have both arrived.
    fn stages_received(&self) -> bool {
        self.grid.is_some()
            && (self.pending_consonants.is_some()
                || self.phase_is_past(RunPhase::AwaitingConsonants))
    }

    fn phase_is_past(&self, phase: RunPhase) -> bool {
        let order = |p: RunPhase| match p {
            RunPhase::Idle => 0,
            RunPhase::AwaitingGrid => 1,
            RunPhase::RevealingGrid => 2,
            RunPhase::AwaitingConsonants => 3,
            RunPhase::RevealingConsonants => 4,
            RunPhase::AwaitingProphecy => 5,
            RunPhase::RevealingProphecy => 6,
            RunPhase::Done | RunPhase::Failed => 7,
        };
        order(self.phase) > order(phase)
    }

    fn set_phase(&mut self, phase: RunPhase) {
        self.phase = phase;
        if self.update_view(|view| view.phase = phase) {
            self.emit(RevealUpdate::PhaseChanged {
                run: self.ctx.run,
                phase,
            });
        }
    }

    fn set_status(&self, status: &str) {
        let text = status.to_string();
        if self.update_view(|view| view.status = Some(text)) {
            self.emit(RevealUpdate::StatusChanged {
                run: self.ctx.run,
                status: status.to_string(),
            });
        }
    }

    fn is_current(&self) -> bool {
        self.ctx.view.borrow().run == Some(self.ctx.run)
    }

    /// Applies `apply` only while the view still belongs to this run.
    fn update_view(&self, apply: impl FnOnce(&mut RevealView)) -> bool {
        let run = self.ctx.run;
        self.ctx.view.send_if_modified(|view| {
            if view.run != Some(run) {
                return false;
            }
            apply(view);
            true
        })
    }

    /// Broadcasts under the view lock so a superseding submit cannot slip in between.
    fn emit(&self, update: RevealUpdate) {
        let run = self.ctx.run;
        let updates = &self.ctx.updates;
        self.ctx.view.send_if_modified(|view| {
            if view.run == Some(run) {
                let _ = updates.send(update);
            }
            false
        });
    }
}
