//! Per-session conversation state.
//!
//! An explicit context object passed into every pipeline operation —
//! never process-global — so sessions stay independent and the pipeline
//! stays testable.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::VecDeque;

use crate::models::{ConversationTurn, Role};

#[derive(Debug)]
pub struct SessionContext {
    /// Sliding window of recent turns; oldest evicted on overflow.
    history: VecDeque<ConversationTurn>,
    max_history: usize,
    plans_executed: u64,
    created_at: DateTime<Utc>,
    last_activity: Option<DateTime<Utc>>,
}

#[derive(Debug, Serialize)]
pub struct SessionStats {
    pub history_len: usize,
    pub plans_executed: u64,
    pub created_at: DateTime<Utc>,
    pub last_activity: Option<DateTime<Utc>>,
}

impl SessionContext {
    pub fn new(max_history: usize) -> Self {
        Self {
            history: VecDeque::with_capacity(max_history),
            max_history,
            plans_executed: 0,
            created_at: Utc::now(),
            last_activity: None,
        }
    }

    pub fn push_turn(&mut self, role: Role, content: impl Into<String>) {
        let now = Utc::now();
        self.history.push_back(ConversationTurn {
            role,
            content: content.into(),
            timestamp: now,
        });
        while self.history.len() > self.max_history {
            self.history.pop_front();
        }
        self.last_activity = Some(now);
    }

    /// Most recent turns, oldest first.
    pub fn history(&self) -> impl Iterator<Item = &ConversationTurn> {
        self.history.iter()
    }

    /// Timestamp of the last turn, or session creation if none yet.
    pub fn last_seen(&self) -> DateTime<Utc> {
        self.last_activity.unwrap_or(self.created_at)
    }

    pub fn record_plan(&mut self) {
        self.plans_executed += 1;
    }

    pub fn clear(&mut self) {
        self.history.clear();
    }

    pub fn stats(&self) -> SessionStats {
        SessionStats {
            history_len: self.history.len(),
            plans_executed: self.plans_executed,
            created_at: self.created_at,
            last_activity: self.last_activity,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_history_is_bounded_and_evicts_oldest() {
        let mut session = SessionContext::new(4);
        for i in 0..6 {
            session.push_turn(Role::User, format!("turn {}", i));
        }
        let contents: Vec<&str> = session.history().map(|t| t.content.as_str()).collect();
        assert_eq!(contents, vec!["turn 2", "turn 3", "turn 4", "turn 5"]);
    }

    #[test]
    fn test_clear_empties_history_but_keeps_counter() {
        let mut session = SessionContext::new(4);
        session.push_turn(Role::User, "hello");
        session.record_plan();
        session.clear();
        let stats = session.stats();
        assert_eq!(stats.history_len, 0);
        assert_eq!(stats.plans_executed, 1);
    }

    #[test]
    fn test_last_seen_tracks_activity() {
        let mut session = SessionContext::new(4);
        assert_eq!(session.last_seen(), session.stats().created_at);
        session.push_turn(Role::User, "hello");
        assert_eq!(Some(session.last_seen()), session.stats().last_activity);
    }

    #[test]
    fn test_turns_carry_roles_in_order() {
        let mut session = SessionContext::new(10);
        session.push_turn(Role::User, "question");
        session.push_turn(Role::Assistant, "answer");
        let roles: Vec<Role> = session.history().map(|t| t.role).collect();
        assert_eq!(roles, vec![Role::User, Role::Assistant]);
    }
}
