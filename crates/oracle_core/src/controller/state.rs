//! Visible state of a reveal run and the notifications emitted while it changes.

use shared::{
    domain::{RunId, Symbol},
    protocol::{Prophecy, GRID_SIZE},
};

use crate::error::OracleError;

pub const STATUS_SUBMITTED: &str = "Looking into the abyss...";
pub const STATUS_DECODING: &str = "Decoding the resonant glyphs...";
pub const STATUS_DECRYPTING: &str = "The Oracle is decrypting the glyphs...";
pub const STATUS_SPOKEN: &str = "Your stars have spoken...";

pub const GLYPH_SEPARATOR: &str = ",";

/// Most advanced stage on screen. Only moves forward within a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub enum RevealStage {
    #[default]
    Idle,
    Grid,
    Consonants,
    Prophecy,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum RunPhase {
    #[default]
    Idle,
    AwaitingGrid,
    RevealingGrid,
    AwaitingConsonants,
    RevealingConsonants,
    AwaitingProphecy,
    RevealingProphecy,
    Done,
    Failed,
}

impl RunPhase {
    pub fn is_terminal(self) -> bool {
        matches!(self, RunPhase::Done | RunPhase::Failed)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            RunPhase::Idle => "idle",
            RunPhase::AwaitingGrid => "awaiting-grid",
            RunPhase::RevealingGrid => "revealing-grid",
            RunPhase::AwaitingConsonants => "awaiting-consonants",
            RunPhase::RevealingConsonants => "revealing-consonants",
            RunPhase::AwaitingProphecy => "awaiting-prophecy",
            RunPhase::RevealingProphecy => "revealing-prophecy",
            RunPhase::Done => "done",
            RunPhase::Failed => "failed",
        }
    }
}

pub type VisibleGrid = [[Option<Symbol>; GRID_SIZE]; GRID_SIZE];

#[derive(Debug, Clone, Default, PartialEq)]
pub struct RevealView {
    pub run: Option<RunId>,
    pub phase: RunPhase,
    pub stage: RevealStage,
    pub grid: VisibleGrid,
    /// Consonants interleaved with separators, in display order.
    pub glyphs: Vec<String>,
    pub visible_glyphs: usize,
    pub prophecy: Option<Prophecy>,
    pub status: Option<String>,
    pub loading: bool,
    pub error: Option<String>,
}

impl RevealView {
    /// Fresh view for a run that has been submitted but not yet accepted.
    pub fn submitted(run: RunId) -> Self {
        Self {
            run: Some(run),
            status: Some(STATUS_SUBMITTED.to_string()),
            loading: true,
            ..Self::default()
        }
    }

    pub fn revealed_cells(&self) -> usize {
        self.grid.iter().flatten().filter(|cell| cell.is_some()).count()
    }

    pub fn visible_glyph_text(&self) -> String {
        self.glyphs[..self.visible_glyphs.min(self.glyphs.len())].concat()
    }
}

/// `["K","T","B"]` becomes `["K", ",", "T", ",", "B"]`.
pub fn interleave_glyphs(consonants: &[String]) -> Vec<String> {
    let mut glyphs = Vec::with_capacity(consonants.len().saturating_mul(2));
    for (index, consonant) in consonants.iter().enumerate() {
        if index > 0 {
            glyphs.push(GLYPH_SEPARATOR.to_string());
        }
        glyphs.push(consonant.clone());
    }
    glyphs
}

#[derive(Debug, Clone, PartialEq)]
pub enum RevealUpdate {
    RunStarted {
        run: RunId,
    },
    PhaseChanged {
        run: RunId,
        phase: RunPhase,
    },
    StatusChanged {
        run: RunId,
        status: String,
    },
    CellRevealed {
        run: RunId,
        row: usize,
        col: usize,
        value: Symbol,
    },
    GlyphRevealed {
        run: RunId,
        glyph: String,
        visible: usize,
    },
    ProphecyRevealed {
        run: RunId,
        prophecy: Prophecy,
    },
    Completed {
        run: RunId,
    },
    Failed {
        run: RunId,
        error: OracleError,
    },
}

impl RevealUpdate {
    pub fn run(&self) -> RunId {
        match self {
            RevealUpdate::RunStarted { run }
            | RevealUpdate::PhaseChanged { run, .. }
            | RevealUpdate::StatusChanged { run, .. }
            | RevealUpdate::CellRevealed { run, .. }
            | RevealUpdate::GlyphRevealed { run, .. }
            | RevealUpdate::ProphecyRevealed { run, .. }
            | RevealUpdate::Completed { run }
            | RevealUpdate::Failed { run, .. } => *run,
        }
    }
}
