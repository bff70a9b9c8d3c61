use std::io::{self, Write};

use oracle_core::{RevealUpdate, RunPhase};
use shared::protocol::GRID_SIZE;

/// Whether the caller should keep listening after an update.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Finished,
    Failed,
}

/// Writes reveal updates as they happen: the grid row by row, then the
/// glyph line, then the prophecy.
pub struct TerminalRenderer<W: Write> {
    out: W,
    glyph_line_open: bool,
}

impl<W: Write> TerminalRenderer<W> {
    pub fn new(out: W) -> Self {
        Self {
            out,
            glyph_line_open: false,
        }
    }

    pub fn render(&mut self, update: &RevealUpdate) -> io::Result<Flow> {
        match update {
            RevealUpdate::RunStarted { run } => {
                writeln!(self.out, "~ consulting the oracle (run {run}) ~")?;
            }
            RevealUpdate::PhaseChanged { phase, .. } => {
                if *phase == RunPhase::RevealingGrid {
                    writeln!(self.out)?;
                }
            }
            RevealUpdate::StatusChanged { status, .. } => {
                self.close_glyph_line()?;
                writeln!(self.out, "{status}")?;
            }
            RevealUpdate::CellRevealed { col, value, .. } => {
                write!(self.out, "{:>4}", value.to_string())?;
                if col + 1 == GRID_SIZE {
                    writeln!(self.out)?;
                }
            }
            RevealUpdate::GlyphRevealed { glyph, .. } => {
                if !self.glyph_line_open {
                    writeln!(self.out)?;
                    self.glyph_line_open = true;
                }
                write!(self.out, "{glyph}")?;
            }
            RevealUpdate::ProphecyRevealed { prophecy, .. } => {
                self.close_glyph_line()?;
                writeln!(self.out)?;
                writeln!(self.out, "{}", prophecy.prophecy)?;
                if !prophecy.prophecy_en.is_empty() && prophecy.prophecy_en != prophecy.prophecy {
                    writeln!(self.out, "({})", prophecy.prophecy_en)?;
                }
            }
            RevealUpdate::Completed { .. } => {
                self.out.flush()?;
                return Ok(Flow::Finished);
            }
            RevealUpdate::Failed { error, .. } => {
                self.close_glyph_line()?;
                writeln!(self.out, "The oracle faltered: {error}")?;
                self.out.flush()?;
                return Ok(Flow::Failed);
            }
        }
        self.out.flush()?;
        Ok(Flow::Continue)
    }

    fn close_glyph_line(&mut self) -> io::Result<()> {
        if self.glyph_line_open {
            writeln!(self.out)?;
            self.glyph_line_open = false;
        }
        Ok(())
    }

    #[cfg(test)]
    fn into_inner(self) -> W {
        self.out
    }
}
