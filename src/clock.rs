//! Process clock and purge tokens.
//!
//! Two pieces of state are process-wide rather than per-loader: the
//! monotonic "now" for the current request, and the current purge token.
//! [`CacheClock`] owns both. `now` is frozen at its first observation so
//! every TTL decision in a request agrees on the time; generating a new
//! purge token clears it, starting the next observation window.
//!
//! Purge tokens are strings of the form `<microseconds>-<suffix>`. They
//! are totally ordered by their microsecond prefix; identical strings are
//! equal; distinct tokens with equal prefixes are distinct identities with
//! no ordering between them.

use std::cmp::Ordering;
use std::process;
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::sync::{Arc, OnceLock};
use std::time::{SystemTime, UNIX_EPOCH};

use parking_lot::Mutex;

/// Source of the current instant, in microseconds since the Unix epoch.
///
/// The indirection exists so tests can drive time explicitly.
pub trait TimeSource: Send + Sync {
    fn now_micros(&self) -> u64;
}

/// Wall-clock time source.
#[derive(Debug, Default)]
pub struct SystemTimeSource;

impl TimeSource for SystemTimeSource {
    fn now_micros(&self) -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_micros() as u64)
            .unwrap_or(0)
    }
}

/// Manually driven time source for tests.
#[derive(Debug, Default)]
pub struct ManualTimeSource {
    micros: AtomicU64,
}

impl ManualTimeSource {
    pub fn new(micros: u64) -> Self {
        Self {
            micros: AtomicU64::new(micros),
        }
    }

    /// Starts at the given whole-second instant.
    pub fn at_secs(secs: u64) -> Self {
        Self::new(secs * 1_000_000)
    }

    pub fn set_micros(&self, micros: u64) {
        self.micros.store(micros, AtomicOrdering::SeqCst);
    }

    pub fn advance_secs(&self, secs: u64) {
        self.micros
            .fetch_add(secs * 1_000_000, AtomicOrdering::SeqCst);
    }
}

impl TimeSource for ManualTimeSource {
    fn now_micros(&self) -> u64 {
        self.micros.load(AtomicOrdering::SeqCst)
    }
}

#[derive(Debug, Default)]
struct ClockState {
    now_micros: Option<u64>,
    token: Option<String>,
}

/// Process-scoped clock and purge-token service.
pub struct CacheClock {
    source: Arc<dyn TimeSource>,
    state: Mutex<ClockState>,
    seq: AtomicU64,
}

impl CacheClock {
    pub fn new(source: Arc<dyn TimeSource>) -> Self {
        Self {
            source,
            state: Mutex::new(ClockState::default()),
            seq: AtomicU64::new(0),
        }
    }

    /// Clock over the system wall clock.
    pub fn system() -> Self {
        Self::new(Arc::new(SystemTimeSource))
    }

    /// The process-wide default instance.
    pub fn global() -> &'static CacheClock {
        static GLOBAL: OnceLock<CacheClock> = OnceLock::new();
        GLOBAL.get_or_init(CacheClock::system)
    }

    /// The request instant in microseconds: observed once, then frozen
    /// until a new purge token is generated.
    pub fn now_micros(&self) -> u64 {
        let mut state = self.state.lock();
        match state.now_micros {
            Some(now) => now,
            None => {
                let now = self.source.now_micros();
                state.now_micros = Some(now);
                now
            },
        }
    }

    /// The request instant in whole seconds.
    pub fn now_secs(&self) -> u64 {
        self.now_micros() / 1_000_000
    }

    /// Returns the current purge token, generating one if none exists.
    ///
    /// With `reset`, clears both the frozen instant and the token, then
    /// generates a fresh token from a newly observed instant. The suffix
    /// (process id plus an atomic sequence) is process-unique within any
    /// one-second window.
    pub fn purge_token(&self, reset: bool) -> String {
        let mut state = self.state.lock();
        if reset || state.token.is_none() {
            state.now_micros = None;
            let now = self.source.now_micros();
            state.now_micros = Some(now);
            let seq = self.seq.fetch_add(1, AtomicOrdering::Relaxed);
            state.token = Some(format!("{now}-{:x}{seq:04x}", process::id()));
        }
        state.token.clone().unwrap_or_default()
    }

    /// Compares two purge tokens.
    ///
    /// Identical strings are `Equal`; otherwise the numeric microsecond
    /// prefixes decide. Distinct tokens with equal prefixes also compare
    /// `Equal`: they are concurrent identities, not an order.
    pub fn compare(a: &str, b: &str) -> Ordering {
        if a == b {
            return Ordering::Equal;
        }
        micros_prefix(a).cmp(&micros_prefix(b))
    }
}

impl std::fmt::Debug for CacheClock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock();
        f.debug_struct("CacheClock")
            .field("now_micros", &state.now_micros)
            .field("token", &state.token)
            .finish()
    }
}

fn micros_prefix(token: &str) -> u64 {
    token
        .split('-')
        .next()
        .and_then(|p| p.parse().ok())
        .unwrap_or(0)
}
