//! Per-user event buffer and episode readiness

use crate::types::{InteractionEvent, UserId, UserMemoryConfig};
use chrono::{DateTime, Duration, Utc};

/// Pending interactions for one user plus that user's settings
#[derive(Debug, Clone)]
pub struct EventBuffer {
    user_id: UserId,
    config: UserMemoryConfig,
    events: Vec<InteractionEvent>,
}

impl EventBuffer {
    pub fn new(user_id: impl Into<UserId>, config: UserMemoryConfig) -> Self {
        Self {
            user_id: user_id.into(),
            config,
            events: Vec::new(),
        }
    }

    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    pub fn config(&self) -> &UserMemoryConfig {
        &self.config
    }

    /// Replace the settings wholesale; buffered events are kept
    pub fn configure(&mut self, config: UserMemoryConfig) {
        self.config = config;
    }

    pub fn set_opt_in(&mut self, opted_in: bool) {
        self.config.opted_in = opted_in;
    }

    pub fn is_opted_in(&self) -> bool {
        self.config.opted_in
    }

    /// Append an event. Returns false (and drops it) when the user opted out.
    pub fn record(&mut self, event: InteractionEvent) -> bool {
        if !self.config.opted_in {
            return false;
        }
        self.events.push(event);
        true
    }

    /// Age of the oldest buffered event
    pub fn age(&self, now: DateTime<Utc>) -> Option<Duration> {
        self.events.first().map(|first| now - first.timestamp)
    }

    /// Ready when either the count or the age threshold is reached.
    /// Never ready for an opted-out user, whose leftovers cannot be proposed.
    pub fn should_propose(&self, now: DateTime<Utc>) -> bool {
        if !self.config.opted_in || self.events.is_empty() {
            return false;
        }
        if self.events.len() >= self.config.max_buffer_events {
            return true;
        }
        matches!(self.age(now), Some(age) if age >= self.config.max_buffer_age())
    }

    /// Swap the buffer out for an empty one
    pub fn take(&mut self) -> Vec<InteractionEvent> {
        std::mem::take(&mut self.events)
    }

    /// Put previously taken events back in front of anything recorded since
    pub fn restore(&mut self, mut events: Vec<InteractionEvent>) {
        events.append(&mut self.events);
        self.events = events;
    }

    pub fn events(&self) -> &[InteractionEvent] {
        &self.events
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(text: &str, at: DateTime<Utc>) -> InteractionEvent {
        InteractionEvent::new("u1", text, "ok", Default::default(), at)
    }

    fn buffer(max_events: usize, max_age_secs: u64) -> EventBuffer {
        EventBuffer::new("u1", UserMemoryConfig::new(true, max_events, max_age_secs))
    }

    #[test]
    fn empty_buffer_is_never_ready() {
        let buf = buffer(0, 0);
        assert!(!buf.should_propose(Utc::now()));
    }

    #[test]
    fn count_threshold_makes_buffer_ready() {
        let now = Utc::now();
        let mut buf = buffer(2, 600);
        buf.record(event("a", now));
        assert!(!buf.should_propose(now));
        buf.record(event("b", now));
        assert!(buf.should_propose(now));
    }

    #[test]
    fn age_threshold_makes_buffer_ready() {
        let now = Utc::now();
        let mut buf = buffer(100, 60);
        buf.record(event("a", now));
        assert!(!buf.should_propose(now + Duration::seconds(59)));
        assert!(buf.should_propose(now + Duration::seconds(60)));
    }

    #[test]
    fn readiness_is_monotone_in_length_and_age() {
        let start = Utc::now();
        let mut buf = buffer(4, 120);
        let mut was_ready = false;
        for i in 0..6 {
            buf.record(event(&format!("e{i}"), start));
            let ready = buf.should_propose(start);
            assert!(ready || !was_ready);
            was_ready = ready;
        }

        let mut buf = buffer(100, 120);
        buf.record(event("a", start));
        let mut was_ready = false;
        for secs in (0..300).step_by(15) {
            let ready = buf.should_propose(start + Duration::seconds(secs));
            assert!(ready || !was_ready);
            was_ready = ready;
        }
        assert!(was_ready);
    }

    #[test]
    fn opted_out_buffer_drops_events() {
        let now = Utc::now();
        let mut buf = EventBuffer::new("u1", UserMemoryConfig::new(false, 8, 600));
        assert!(!buf.record(event("a", now)));
        assert!(buf.is_empty());
    }

    #[test]
    fn opting_out_keeps_leftovers_but_is_never_ready() {
        let now = Utc::now();
        let mut buf = buffer(1, 600);
        buf.record(event("a", now));
        buf.set_opt_in(false);
        assert_eq!(buf.len(), 1);
        assert!(!buf.should_propose(now));
    }

    #[test]
    fn configure_keeps_buffered_events() {
        let now = Utc::now();
        let mut buf = buffer(8, 600);
        buf.record(event("a", now));
        buf.configure(UserMemoryConfig::new(true, 1, 600));
        assert_eq!(buf.len(), 1);
        assert!(buf.should_propose(now));
    }

    #[test]
    fn take_empties_and_restore_prepends() {
        let now = Utc::now();
        let mut buf = buffer(8, 600);
        buf.record(event("a", now));
        buf.record(event("b", now));

        let taken = buf.take();
        assert_eq!(taken.len(), 2);
        assert!(buf.is_empty());

        buf.record(event("c", now));
        buf.restore(taken);
        let order: Vec<&str> = buf.events().iter().map(|e| e.input_text.as_str()).collect();
        assert_eq!(order, vec!["a", "b", "c"]);
    }
}
