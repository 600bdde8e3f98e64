//! Status and error messages produced while loading and rendering
//!
//! The library reports through the [`Notifier`] trait; the binary keeps
//! them in a [`NotificationManager`] and prints what is current.

use std::time::{Duration, Instant};

use log::{error, info, warn};

/// Receiver of user-facing messages from the font pool and the session
pub trait Notifier {
    /// Transient progress text, e.g. which font is being generated
    fn status(&mut self, message: &str);

    fn warning(&mut self, message: &str);

    fn error(&mut self, message: &str);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotificationLevel {
    Status,
    Warning,
    Error,
}

#[derive(Debug, Clone)]
pub struct Notification {
    pub message: String,
    pub level: NotificationLevel,
    /// None for messages that stay until cleared
    pub expires_at: Option<Instant>,
}

impl Notification {
    pub fn new(message: impl Into<String>, level: NotificationLevel, duration: Option<Duration>) -> Self {
        Self {
            message: message.into(),
            level,
            expires_at: duration.map(|d| Instant::now() + d),
        }
    }

    pub fn is_expired(&self) -> bool {
        self.expires_at.is_some_and(|at| Instant::now() >= at)
    }
}

/// Newest-first message list
///
/// Status messages expire after the default duration; warnings and
/// errors stay until cleared.
#[derive(Debug)]
pub struct NotificationManager {
    notifications: Vec<Notification>,
    status_duration: Duration,
}

impl Default for NotificationManager {
    fn default() -> Self {
        Self::new()
    }
}

impl NotificationManager {
    pub fn new() -> Self {
        Self::with_status_duration(Duration::from_secs(5))
    }

    pub fn with_status_duration(status_duration: Duration) -> Self {
        Self {
            notifications: Vec::new(),
            status_duration,
        }
    }

    pub fn notify(&mut self, message: impl Into<String>, level: NotificationLevel) {
        let duration = match level {
            NotificationLevel::Status => Some(self.status_duration),
            NotificationLevel::Warning | NotificationLevel::Error => None,
        };
        self.notifications
            .insert(0, Notification::new(message, level, duration));
    }

    /// Remove expired notifications, returns true if any were removed
    pub fn update(&mut self) -> bool {
        let initial_len = self.notifications.len();
        self.notifications.retain(|n| !n.is_expired());
        self.notifications.len() != initial_len
    }

    pub fn current(&self) -> Option<&Notification> {
        self.notifications.first()
    }

    pub fn all(&self) -> &[Notification] {
        &self.notifications
    }

    pub fn errors(&self) -> impl Iterator<Item = &Notification> {
        self.notifications
            .iter()
            .filter(|n| n.level == NotificationLevel::Error)
    }

    pub fn clear(&mut self) {
        self.notifications.clear();
    }

    pub fn dismiss(&mut self) {
        if !self.notifications.is_empty() {
            self.notifications.remove(0);
        }
    }
}

impl Notifier for NotificationManager {
    fn status(&mut self, message: &str) {
        info!("{message}");
        self.notify(message, NotificationLevel::Status);
    }

    fn warning(&mut self, message: &str) {
        warn!("{message}");
        self.notify(message, NotificationLevel::Warning);
    }

    fn error(&mut self, message: &str) {
        error!("{message}");
        self.notify(message, NotificationLevel::Error);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn newest_first() {
        let mut manager = NotificationManager::new();
        manager.status("first");
        manager.error("second");
        assert_eq!(manager.current().unwrap().message, "second");
        assert_eq!(manager.all().len(), 2);
        assert_eq!(manager.errors().count(), 1);
    }

    #[test]
    fn status_expires_but_errors_stay() {
        let mut manager = NotificationManager::with_status_duration(Duration::ZERO);
        manager.status("progress");
        manager.warning("missing font");
        assert!(manager.update());
        assert_eq!(manager.all().len(), 1);
        assert_eq!(manager.current().unwrap().level, NotificationLevel::Warning);
    }

    #[test]
    fn dismiss_removes_current() {
        let mut manager = NotificationManager::new();
        manager.status("a");
        manager.status("b");
        manager.dismiss();
        assert_eq!(manager.current().unwrap().message, "a");
        manager.clear();
        assert!(manager.current().is_none());
    }
}
