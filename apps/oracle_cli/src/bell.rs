use std::io::{self, Write};

use anyhow::Result;
use oracle_core::AudioSink;

/// Rings the terminal bell on every reveal. There is no ambient track.
pub struct TerminalBell;

impl AudioSink for TerminalBell {
    fn start_ambient(&self) -> Result<()> {
        Ok(())
    }

    fn play_cue(&self) -> Result<()> {
        let mut err = io::stderr().lock();
        err.write_all(b"\x07")?;
        err.flush()?;
        Ok(())
    }

    fn stop(&self) {}
}
