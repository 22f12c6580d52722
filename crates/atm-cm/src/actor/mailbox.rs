//! Mailbox depth monitoring for the manager actor.
//!
//! Depth thresholds scale with the configured mailbox size: warning at half,
//! critical at 90%.

use crate::observability::metrics as obs;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use tracing::{debug, warn};

/// Mailbox level relative to configured capacity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MailboxLevel {
    Normal,
    Warning,
    Critical,
}

/// Tracks depth and throughput of an actor mailbox.
#[derive(Debug)]
pub struct MailboxMonitor {
    /// Owning manager instance, for log context.
    cm_id: String,
    warning_threshold: usize,
    critical_threshold: usize,
    depth: AtomicUsize,
    peak_depth: AtomicUsize,
    messages_processed: AtomicU64,
}

impl MailboxMonitor {
    #[must_use]
    pub fn new(cm_id: impl Into<String>, capacity: usize) -> Self {
        Self {
            cm_id: cm_id.into(),
            warning_threshold: (capacity / 2).max(1),
            critical_threshold: (capacity * 9 / 10).max(1),
            depth: AtomicUsize::new(0),
            peak_depth: AtomicUsize::new(0),
            messages_processed: AtomicU64::new(0),
        }
    }

    /// Record a message taken off the channel with `backlog` messages still
    /// queued behind it. The one in hand counts toward the depth.
    pub fn record_receive(&self, backlog: usize) {
        let new_depth = backlog.saturating_add(1);
        let previous = self.depth.swap(new_depth, Ordering::Relaxed);
        self.peak_depth.fetch_max(new_depth, Ordering::Relaxed);

        let level = self.level_for_depth(new_depth);
        if level == MailboxLevel::Critical {
            warn!(
                target: "atm.cm.mailbox",
                cm_id = %self.cm_id,
                depth = new_depth,
                threshold = self.critical_threshold,
                "Mailbox depth critical"
            );
        } else if level == MailboxLevel::Warning && previous < self.warning_threshold {
            debug!(
                target: "atm.cm.mailbox",
                cm_id = %self.cm_id,
                depth = new_depth,
                "Mailbox depth elevated"
            );
        }
        obs::set_mailbox_depth(new_depth);
    }

    /// Record the message in hand as processed.
    pub fn record_processed(&self) {
        let previous = self
            .depth
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |d| {
                Some(d.saturating_sub(1))
            })
            .unwrap_or(0);
        self.messages_processed.fetch_add(1, Ordering::Relaxed);
        obs::set_mailbox_depth(previous.saturating_sub(1));
    }

    #[must_use]
    pub fn current_depth(&self) -> usize {
        self.depth.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn peak_depth(&self) -> usize {
        self.peak_depth.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn messages_processed(&self) -> u64 {
        self.messages_processed.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn current_level(&self) -> MailboxLevel {
        self.level_for_depth(self.current_depth())
    }

    fn level_for_depth(&self, depth: usize) -> MailboxLevel {
        if depth >= self.critical_threshold {
            MailboxLevel::Critical
        } else if depth >= self.warning_threshold {
            MailboxLevel::Warning
        } else {
            MailboxLevel::Normal
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mailbox_monitor_depth_and_peak() {
        let monitor = MailboxMonitor::new("atmcm-test", 100);

        monitor.record_receive(2);
        assert_eq!(monitor.current_depth(), 3);
        assert_eq!(monitor.peak_depth(), 3);

        monitor.record_processed();
        assert_eq!(monitor.current_depth(), 2);
        assert_eq!(monitor.peak_depth(), 3); // Peak stays at 3
        assert_eq!(monitor.messages_processed(), 1);
    }

    #[test]
    fn test_depth_follows_backlog_not_message_count() {
        let monitor = MailboxMonitor::new("atmcm-test", 100);

        // A steady stream handled one at a time never builds a backlog
        for _ in 0..200 {
            monitor.record_receive(0);
            monitor.record_processed();
        }
        assert_eq!(monitor.current_depth(), 0);
        assert_eq!(monitor.peak_depth(), 1);
        assert_eq!(monitor.messages_processed(), 200);

        // A burst is visible while it drains
        monitor.record_receive(9);
        assert_eq!(monitor.current_depth(), 10);
        monitor.record_processed();
        monitor.record_receive(8);
        assert_eq!(monitor.current_depth(), 9);
        assert_eq!(monitor.peak_depth(), 10);
    }

    #[test]
    fn test_mailbox_monitor_levels() {
        let monitor = MailboxMonitor::new("atmcm-test", 100);
        assert_eq!(monitor.current_level(), MailboxLevel::Normal);

        monitor.record_receive(49);
        assert_eq!(monitor.current_level(), MailboxLevel::Warning);

        monitor.record_receive(89);
        assert_eq!(monitor.current_level(), MailboxLevel::Critical);

        monitor.record_processed();
        monitor.record_receive(0);
        assert_eq!(monitor.current_level(), MailboxLevel::Normal);
    }

    #[test]
    fn test_processed_on_empty_mailbox_does_not_underflow() {
        let monitor = MailboxMonitor::new("atmcm-test", 10);
        monitor.record_processed();
        assert_eq!(monitor.current_depth(), 0);
    }
}
