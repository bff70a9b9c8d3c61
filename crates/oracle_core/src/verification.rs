//! Proof-of-humanity token gate in front of the oracle request.

use std::{
    sync::{Arc, Mutex},
    time::{Duration, Instant},
};

use tracing::{info, warn};

pub const DEFAULT_TOKEN_TTL: Duration = Duration::from_secs(300);
pub const VERIFICATION_FAILED: &str = "Captcha verification failed. Please try again.";

/// The third-party challenge the user solves.
pub trait ChallengeWidget: Send + Sync {
    /// Shows the challenge so the user can (re)verify.
    fn present(&self);
    /// Discards whatever the widget currently holds.
    fn reset(&self);
}

/// For front ends where the token comes from outside, e.g. a CLI flag.
pub struct HeadlessChallenge;

impl ChallengeWidget for HeadlessChallenge {
    fn present(&self) {
        info!("verification required; supply a fresh challenge token");
    }

    fn reset(&self) {}
}

#[derive(Debug, Clone, Default)]
enum TokenState {
    #[default]
    Unverified,
    Verified {
        token: String,
        issued_at: Instant,
    },
    Expired,
    Failed,
}

struct GateInner {
    state: Mutex<TokenState>,
    ttl: Duration,
    widget: Arc<dyn ChallengeWidget>,
}

#[derive(Clone)]
pub struct VerificationGate {
    inner: Arc<GateInner>,
}

impl VerificationGate {
    pub fn new(widget: Arc<dyn ChallengeWidget>) -> Self {
        Self::with_ttl(widget, DEFAULT_TOKEN_TTL)
    }

    pub fn with_ttl(widget: Arc<dyn ChallengeWidget>, ttl: Duration) -> Self {
        Self {
            inner: Arc::new(GateInner {
                state: Mutex::new(TokenState::Unverified),
                ttl,
                widget,
            }),
        }
    }

    /// Handle the widget integration calls back into.
    pub fn callbacks(&self) -> ChallengeCallbacks {
        ChallengeCallbacks { gate: self.clone() }
    }

    /// A token that is present and younger than the TTL.
    pub fn token(&self) -> Option<String> {
        let mut state = self.lock();
        let stale = match &*state {
            TokenState::Verified { token, issued_at } if issued_at.elapsed() < self.inner.ttl => {
                return Some(token.clone());
            }
            TokenState::Verified { .. } => true,
            _ => false,
        };
        if stale {
            *state = TokenState::Expired;
        }
        None
    }

    pub fn is_verified(&self) -> bool {
        self.token().is_some()
    }

    /// Message left by the last widget error, if that is the current state.
    pub fn last_error(&self) -> Option<&'static str> {
        matches!(*self.lock(), TokenState::Failed).then_some(VERIFICATION_FAILED)
    }

    /// Asks the user to verify without discarding a still-valid token.
    pub fn request(&self) {
        self.inner.widget.present();
    }

    /// Drops the token and puts the challenge back in front of the user.
    pub fn invalidate(&self) {
        *self.lock() = TokenState::Unverified;
        self.inner.widget.reset();
        self.inner.widget.present();
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, TokenState> {
        self.inner
            .state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Success / expiry / error callbacks wired into the challenge widget.
#[derive(Clone)]
pub struct ChallengeCallbacks {
    gate: VerificationGate,
}

impl ChallengeCallbacks {
    pub fn on_success(&self, token: impl Into<String>) {
        *self.gate.lock() = TokenState::Verified {
            token: token.into(),
            issued_at: Instant::now(),
        };
        info!("verification succeeded");
    }

    pub fn on_expired(&self) {
        *self.gate.lock() = TokenState::Expired;
        info!("verification token expired");
        self.gate.inner.widget.present();
    }

    pub fn on_error(&self) {
        *self.gate.lock() = TokenState::Failed;
        warn!("verification widget reported an error");
    }
}
