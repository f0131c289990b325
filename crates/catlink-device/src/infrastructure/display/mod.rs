//! Display backends.
//!
//! The simulator has no panel, so [`LoggingDisplay`] renders by logging what
//! a real display would show and keeping the result in memory where tests
//! and the status log can read it back.

use std::collections::HashSet;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use catlink_core::protocol::messages::{Mode, Temps};
use tracing::info;

use crate::application::dispatch::{BackendError, DisplayBackend};

/// What is currently on screen.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct DisplaySnapshot {
    pub mode: Option<Mode>,
    pub last_trigger: Option<String>,
    pub temps: Option<Temps>,
}

#[derive(Debug, Default)]
struct DisplayState {
    snapshot: DisplaySnapshot,
    animating_until: Option<Instant>,
}

/// Backend that logs every render request.
///
/// A trigger starts an animation lasting `animation` (zero disables this);
/// a second trigger while it runs is refused as busy instead of waiting.
#[derive(Debug)]
pub struct LoggingDisplay {
    triggers: HashSet<String>,
    animation: Duration,
    state: Mutex<DisplayState>,
}

impl LoggingDisplay {
    /// `triggers` lists the ids the display can play.  An empty list accepts
    /// any id.
    pub fn new(triggers: impl IntoIterator<Item = String>, animation: Duration) -> Self {
        Self {
            triggers: triggers.into_iter().collect(),
            animation,
            state: Mutex::new(DisplayState::default()),
        }
    }

    pub fn snapshot(&self) -> DisplaySnapshot {
        self.lock()
            .map(|state| state.snapshot.clone())
            .unwrap_or_default()
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, DisplayState>, BackendError> {
        self.state
            .lock()
            .map_err(|_| BackendError::Fault("display state poisoned".to_string()))
    }
}

impl DisplayBackend for LoggingDisplay {
    fn set_mode(&self, mode: Mode) -> Result<(), BackendError> {
        let mut state = self.lock()?;
        info!("display mode -> {}", mode);
        state.snapshot.mode = Some(mode);
        Ok(())
    }

    fn play_trigger(&self, id: &str) -> Result<(), BackendError> {
        if !self.triggers.is_empty() && !self.triggers.contains(id) {
            return Err(BackendError::UnknownTrigger(id.to_string()));
        }
        let mut state = self.lock()?;
        let now = Instant::now();
        if state.animating_until.is_some_and(|until| now < until) {
            return Err(BackendError::Busy);
        }
        info!("display trigger {:?}", id);
        state.snapshot.last_trigger = Some(id.to_string());
        state.animating_until = (!self.animation.is_zero()).then(|| now + self.animation);
        Ok(())
    }

    fn show_temps(&self, temps: &Temps) -> Result<(), BackendError> {
        let mut state = self.lock()?;
        info!("display temps cpu={:?} gpu={:?}", temps.cpu, temps.gpu);
        state.snapshot.temps = Some(*temps);
        Ok(())
    }
}
