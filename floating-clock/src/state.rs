use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

pub const DEFAULT_SECONDS: u64 = 100;

/// The persisted timer record. Missing fields fall back to their defaults
/// so records written by older builds still load.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct TimerState {
    pub is_running: bool,
    pub current_time: u64,
    pub default_time: u64,
    pub clock_visible_by_scope: BTreeMap<String, bool>,
    pub is_suspended: bool,
}

impl Default for TimerState {
    fn default() -> Self {
        Self {
            is_running: false,
            current_time: DEFAULT_SECONDS,
            default_time: DEFAULT_SECONDS,
            clock_visible_by_scope: BTreeMap::new(),
            is_suspended: false,
        }
    }
}

/// Optional per-site lookup key
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VisibilityScope {
    pub site: Option<String>,
}

impl From<Option<String>> for VisibilityScope {
    fn from(site: Option<String>) -> Self {
        Self { site }
    }
}

impl VisibilityScope {
    pub fn key(&self) -> Option<String> {
        self.site
            .as_deref()
            .filter(|site| !site.is_empty())
            .map(scope_key)
    }
}

pub fn scope_key(site: &str) -> String {
    format!("site:{}", site.to_lowercase())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Suspended,
    Idle,
    Running,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Phase::Suspended => "suspended",
            Phase::Idle => "idle",
            Phase::Running => "running",
        };
        f.write_str(name)
    }
}

impl TimerState {
    pub fn phase(&self) -> Phase {
        if self.is_suspended {
            Phase::Suspended
        } else if self.is_running {
            Phase::Running
        } else {
            Phase::Idle
        }
    }

    /// One countdown step. Zero wraps back to the default duration.
    pub fn advance(&mut self) {
        if self.current_time == 0 {
            self.current_time = self.default_time;
        } else {
            self.current_time -= 1;
        }
    }

    pub fn visibility(&self, scope: &VisibilityScope) -> bool {
        scope
            .key()
            .and_then(|key| self.clock_visible_by_scope.get(&key).copied())
            .unwrap_or(true)
    }

    /// Returns false when the scope names no site and nothing changed.
    pub fn set_visibility(&mut self, visible: bool, scope: &VisibilityScope) -> bool {
        match scope.key() {
            Some(key) => {
                self.clock_visible_by_scope.insert(key, visible);
                true
            }
            None => false,
        }
    }
}
