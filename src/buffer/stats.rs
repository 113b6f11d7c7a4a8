//! Per-collaborator activity accounting.

use std::fmt;
use std::time::{Duration, Instant};

use serde::Serialize;

use crate::collaborator::PushDelays;

/// Collaborators quiet for longer than this are omitted from profiles.
pub const PROFILE_WINDOW: Duration = Duration::from_secs(5);

/// Recent activity timestamps plus the configured push delays for one
/// collaborator.
#[derive(Clone, Copy, Debug)]
pub struct CollaboratorStats {
    /// Last time a notification was handed to the collaborator.
    pub last_request_at: Option<Instant>,
    /// Last time the collaborator handed back a response.
    pub last_response_at: Option<Instant>,
    /// Last time a response from the collaborator was committed.
    pub last_change_at: Option<Instant>,
    pub delays: PushDelays,
}

impl CollaboratorStats {
    pub fn new(delays: PushDelays) -> Self {
        Self {
            last_request_at: None,
            last_response_at: None,
            last_change_at: None,
            delays,
        }
    }

    pub(crate) fn mark_request(&mut self) {
        self.last_request_at = Some(Instant::now());
    }

    pub(crate) fn mark_response(&mut self) {
        self.last_response_at = Some(Instant::now());
    }

    pub(crate) fn mark_change(&mut self) {
        self.last_change_at = Some(Instant::now());
    }

    /// Most recent activity of any kind.
    fn last_activity(&self) -> Option<Instant> {
        [
            self.last_request_at,
            self.last_response_at,
            self.last_change_at,
        ]
        .into_iter()
        .flatten()
        .max()
    }

    pub(crate) fn active_within(&self, window: Duration) -> bool {
        self.last_activity()
            .is_some_and(|at| at.elapsed() <= window)
    }
}

/// Human-readable activity record for one collaborator.
#[derive(Clone, Debug, Serialize)]
pub struct ProfileRecord {
    pub name: String,
    /// Elapsed since the collaborator was last handed a notification.
    pub since_request: Option<Duration>,
    /// Elapsed since the collaborator last responded.
    pub since_response: Option<Duration>,
    /// Elapsed since a response from the collaborator was committed.
    pub since_change: Option<Duration>,
}

fn ago(elapsed: Option<Duration>) -> String {
    match elapsed {
        Some(d) => format!("{}ms ago", d.as_millis()),
        None => "never".to_string(),
    }
}

impl fmt::Display for ProfileRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}: request {}, response {}, change {}",
            self.name,
            ago(self.since_request),
            ago(self.since_response),
            ago(self.since_change),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_stats_are_inactive() {
        let stats = CollaboratorStats::new(PushDelays::ZERO);
        assert!(!stats.active_within(PROFILE_WINDOW));
    }

    #[test]
    fn marked_stats_are_active() {
        let mut stats = CollaboratorStats::new(PushDelays::ZERO);
        stats.mark_request();
        assert!(stats.active_within(PROFILE_WINDOW));
    }

    #[test]
    fn stale_activity_falls_out_of_the_window() {
        let mut stats = CollaboratorStats::new(PushDelays::ZERO);
        stats.last_response_at = Instant::now().checked_sub(Duration::from_secs(6));
        assert!(stats.last_response_at.is_some());
        assert!(!stats.active_within(PROFILE_WINDOW));
    }

    #[test]
    fn display_names_the_collaborator() {
        let record = ProfileRecord {
            name: "spellcheck".into(),
            since_request: Some(Duration::from_millis(800)),
            since_response: None,
            since_change: None,
        };
        let rendered = record.to_string();
        assert!(rendered.starts_with("spellcheck:"));
        assert!(rendered.contains("800ms ago"));
        assert!(rendered.contains("response never"));
    }

    #[test]
    fn record_serializes() {
        let record = ProfileRecord {
            name: "loader".into(),
            since_request: None,
            since_response: Some(Duration::from_millis(120)),
            since_change: None,
        };
        let json = serde_json::to_string(&record).expect("serialize profile record");
        assert!(json.contains("\"loader\""));
    }
}
