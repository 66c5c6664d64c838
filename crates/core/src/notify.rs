use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use tracing::debug;

use crate::error::ErrorKind;
use crate::host::{Dialog, Notification};

/// Window during which the same (kind, code) pair is shown only once.
pub const DEFAULT_WINDOW: Duration = Duration::from_secs(600);

/// Throttles user-visible error notifications per process.
#[derive(Debug)]
pub struct NotificationThrottle {
    window: Duration,
    shown: Mutex<HashMap<(ErrorKind, String), Instant>>,
}

impl Default for NotificationThrottle {
    fn default() -> Self {
        Self::new(DEFAULT_WINDOW)
    }
}

impl NotificationThrottle {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            shown: Mutex::new(HashMap::new()),
        }
    }

    /// Record an attempt; true when the notification should be shown.
    pub fn admit(&self, kind: ErrorKind, code: &str) -> bool {
        let now = Instant::now();
        let mut shown = self.shown.lock().unwrap_or_else(|e| e.into_inner());
        let key = (kind, code.to_string());
        match shown.get(&key) {
            Some(at) if now.duration_since(*at) < self.window => false,
            _ => {
                shown.insert(key, now);
                true
            }
        }
    }

    /// Show `notification` through `dialog` unless throttled.
    pub async fn notify(
        &self,
        dialog: &dyn Dialog,
        kind: ErrorKind,
        code: &str,
        notification: Notification,
    ) -> bool {
        if !self.admit(kind, code) {
            debug!(kind = %kind, code, "notification throttled");
            return false;
        }
        dialog.notify(notification).await;
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_kind_and_code_shown_once_per_window() {
        let throttle = NotificationThrottle::new(Duration::from_secs(60));
        assert!(throttle.admit(ErrorKind::Server, "trakt"));
        assert!(!throttle.admit(ErrorKind::Server, "trakt"));
        assert!(throttle.admit(ErrorKind::Server, "tmdb"));
        assert!(throttle.admit(ErrorKind::RateLimited, "trakt"));
    }

    #[test]
    fn zero_window_never_throttles() {
        let throttle = NotificationThrottle::new(Duration::ZERO);
        assert!(throttle.admit(ErrorKind::Host, "player"));
        assert!(throttle.admit(ErrorKind::Host, "player"));
    }
}
