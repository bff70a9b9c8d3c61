//! Sound cues for the reveal. Playback problems never reach the user.

use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

use anyhow::Result;
use tracing::debug;

/// Output device for the oracle's sounds. Implementations that need
/// overlapping cues should clone their source per `play_cue` call.
pub trait AudioSink: Send + Sync {
    /// Starts the looping background track.
    fn start_ambient(&self) -> Result<()>;
    /// Short cue played on every reveal tick.
    fn play_cue(&self) -> Result<()>;
    /// Stops the background track and any cue still playing.
    fn stop(&self);
}

pub struct SilentAudio;

impl AudioSink for SilentAudio {
    fn start_ambient(&self) -> Result<()> {
        Ok(())
    }

    fn play_cue(&self) -> Result<()> {
        Ok(())
    }

    fn stop(&self) {}
}

/// Mount/unmount lifecycle around a sink, owned by the controller.
#[derive(Clone)]
pub struct AudioDeck {
    sink: Arc<dyn AudioSink>,
    mounted: Arc<AtomicBool>,
}

impl AudioDeck {
    pub fn new(sink: Arc<dyn AudioSink>) -> Self {
        Self {
            sink,
            mounted: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn mount(&self) {
        if self.mounted.swap(true, Ordering::SeqCst) {
            return;
        }
        if let Err(err) = self.sink.start_ambient() {
            debug!(error = %err, "ambient track did not start");
        }
    }

    pub fn cue(&self) {
        if !self.mounted.load(Ordering::SeqCst) {
            return;
        }
        if let Err(err) = self.sink.play_cue() {
            debug!(error = %err, "reveal cue did not play");
        }
    }

    pub fn unmount(&self) {
        if self.mounted.swap(false, Ordering::SeqCst) {
            self.sink.stop();
        }
    }

    pub fn is_mounted(&self) -> bool {
        self.mounted.load(Ordering::SeqCst)
    }
}
