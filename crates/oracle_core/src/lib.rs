pub mod audio;
pub mod config;
pub mod controller;
pub mod error;
pub mod review;
pub mod scheduler;
pub mod stream_reader;
pub mod transport;
pub mod verification;

pub use audio::{AudioDeck, AudioSink, SilentAudio};
pub use config::{load_settings, Settings};
pub use controller::{ControllerOptions, RevealUpdate, RevealView, RunController, RunPhase};
pub use error::{OracleError, OracleErrorKind};
pub use review::{HttpReviewClient, ReviewBoard, ReviewClient, ReviewError};
pub use transport::{HttpOracleTransport, OracleTransport, ReplayTransport};
pub use verification::{ChallengeCallbacks, ChallengeWidget, HeadlessChallenge, VerificationGate};
