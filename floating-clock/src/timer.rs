//! The countdown: state transitions over the persisted record

use crate::alarm::Alarm;
use crate::state::{TimerState, VisibilityScope};
use crate::store::{KeyValueStore, StoreError};
use tracing::{debug, info, warn};

pub const STATE_KEY: &str = "timerState";

/// What a single alarm firing did to the record
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tick {
    Advanced(u64),
    Skipped,
}

/// Owns the timer record and the alarm that drives it. Every operation
/// loads the record, applies one change and writes it back whole; the
/// alarm only changes once the write has succeeded.
pub struct TimerCore<S> {
    store: S,
    alarm: Alarm,
}

impl<S: KeyValueStore> TimerCore<S> {
    pub fn new(store: S, alarm: Alarm) -> Self {
        Self { store, alarm }
    }

    pub fn alarm(&self) -> &Alarm {
        &self.alarm
    }

    pub fn alarm_mut(&mut self) -> &mut Alarm {
        &mut self.alarm
    }

    /// Reads the record; anything unreadable counts as no state yet.
    pub fn load(&self) -> TimerState {
        let value = match self.store.get_item(STATE_KEY) {
            Ok(Some(value)) => value,
            Ok(None) => return TimerState::default(),
            Err(e) => {
                warn!("Failed to read timer state, using defaults: {}", e);
                return TimerState::default();
            }
        };
        serde_json::from_value(value).unwrap_or_else(|e| {
            warn!("Stored timer state is unreadable, using defaults: {}", e);
            TimerState::default()
        })
    }

    fn save(&mut self, state: &TimerState) -> Result<(), StoreError> {
        let value = serde_json::to_value(state)?;
        self.store.set_item(STATE_KEY, value)
    }

    /// Re-arms the alarm for a record that was running when the process
    /// last stopped.
    pub fn resume(&mut self) {
        let state = self.load();
        if state.is_running && !state.is_suspended {
            info!("Resuming countdown at {}s", state.current_time);
            self.alarm.arm();
        }
    }

    pub fn run(&mut self) -> Result<(), StoreError> {
        let mut state = self.load();
        if state.is_suspended {
            debug!("Ignoring run while suspended");
            return Ok(());
        }
        if !state.is_running {
            state.is_running = true;
            self.save(&state)?;
            self.alarm.arm();
            info!("Timer started at {}s", state.current_time);
        }
        Ok(())
    }

    pub fn toggle_run(&mut self) -> Result<(), StoreError> {
        let mut state = self.load();
        if state.is_suspended {
            debug!("Ignoring toggle while suspended");
            return Ok(());
        }
        if state.is_running {
            state.is_running = false;
            self.save(&state)?;
            self.alarm.clear();
            info!("Timer stopped at {}s", state.current_time);
            Ok(())
        } else {
            self.run()
        }
    }

    /// Sets the remaining time and makes it the new default.
    pub fn set_time(&mut self, seconds: u64) -> Result<(), StoreError> {
        let mut state = self.load();
        state.current_time = seconds;
        state.default_time = seconds;
        self.save(&state)?;
        info!("Duration set to {}s", seconds);
        Ok(())
    }

    pub fn reset_clock(&mut self) -> Result<(), StoreError> {
        let mut state = self.load();
        state.current_time = state.default_time;
        self.save(&state)
    }

    pub fn get_time(&self) -> u64 {
        self.load().current_time
    }

    pub fn is_running(&self) -> bool {
        self.load().is_running
    }

    pub fn get_visibility(&self, scope: &VisibilityScope) -> bool {
        self.load().visibility(scope)
    }

    pub fn set_visibility(
        &mut self,
        visible: bool,
        scope: &VisibilityScope,
    ) -> Result<(), StoreError> {
        let mut state = self.load();
        if !state.set_visibility(visible, scope) {
            debug!("Visibility change without a site, nothing stored");
            return Ok(());
        }
        self.save(&state)
    }

    pub fn is_suspended(&self) -> bool {
        self.load().is_suspended
    }

    pub fn set_suspended(&mut self, suspended: bool) -> Result<(), StoreError> {
        let mut state = self.load();
        if suspended {
            state.is_running = false;
        }
        state.is_suspended = suspended;
        self.save(&state)?;
        if suspended {
            self.alarm.clear();
        }
        info!("Suspended set to {}", suspended);
        Ok(())
    }

    /// Handles one alarm firing. A firing that races a stop or suspend
    /// finds the flags already cleared and changes nothing.
    pub fn tick(&mut self) -> Result<Tick, StoreError> {
        let mut state = self.load();
        if !state.is_running || state.is_suspended {
            debug!("Dropping tick while {}", state.phase());
            self.alarm.clear();
            return Ok(Tick::Skipped);
        }
        state.advance();
        self.save(&state)?;
        Ok(Tick::Advanced(state.current_time))
    }
}
