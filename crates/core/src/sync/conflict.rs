use std::collections::HashMap;

use chrono::{DateTime, Duration, Utc};

use crate::models::{LineType, NextLineBuffer};

/// Spots another device editing a staged line this device is also editing.
#[derive(Debug, Clone)]
pub struct LineConflictDetector {
    window: Duration,
    local_edits: HashMap<LineType, DateTime<Utc>>,
    warned_at_transition: Option<usize>,
}

impl LineConflictDetector {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            local_edits: HashMap::new(),
            warned_at_transition: None,
        }
    }

    pub fn record_local_edit(&mut self, line: LineType, at: DateTime<Utc>) {
        self.local_edits.insert(line, at);
    }

    pub fn local_edit(&self, line: LineType) -> Option<DateTime<Utc>> {
        self.local_edits.get(&line).copied()
    }

    /// First line whose remote stamp is newer than the local edit and
    /// recent enough to count as concurrent.
    ///
    /// `transition` identifies the current point transition; at most one
    /// conflict is reported per value.
    pub fn check(
        &mut self,
        remote: &NextLineBuffer,
        now: DateTime<Utc>,
        transition: usize,
    ) -> Option<(LineType, DateTime<Utc>)> {
        if self.warned_at_transition == Some(transition) {
            return None;
        }
        let conflict = LineType::ALL.into_iter().find_map(|line| {
            let remote_at = remote.modified_at(line)?;
            let local_at = self.local_edit(line)?;
            (remote_at > local_at && now - remote_at <= self.window).then_some((line, remote_at))
        })?;
        self.warned_at_transition = Some(transition);
        Some(conflict)
    }
}
