//! Hold windows: how long a claim keeps its children before the reaper may
//! release them.

use chrono::{DateTime, Duration, Utc};

use crate::common::{SponsorshipError, SponsorshipResult};
use crate::config::Config;

/// Longest hold any flow may request.
pub const MAX_HOLD_DAYS: i64 = 30;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HoldWindow(Duration);

impl HoldWindow {
    pub fn new(duration: Duration) -> SponsorshipResult<Self> {
        if duration <= Duration::zero() {
            return Err(SponsorshipError::validation("hold window must be positive"));
        }
        if duration > Duration::days(MAX_HOLD_DAYS) {
            return Err(SponsorshipError::validation(format!(
                "hold window may not exceed {} days",
                MAX_HOLD_DAYS
            )));
        }
        Ok(Self(duration))
    }

    pub fn hours(hours: i64) -> SponsorshipResult<Self> {
        if hours <= 0 {
            return Err(SponsorshipError::validation("hold window must be positive"));
        }
        if hours > MAX_HOLD_DAYS * 24 {
            return Err(SponsorshipError::validation(format!(
                "hold window may not exceed {} days",
                MAX_HOLD_DAYS
            )));
        }
        Self::new(Duration::hours(hours))
    }

    /// Full reservation flow default (48 hours).
    pub fn reservation() -> Self {
        Self(Duration::hours(48))
    }

    /// Lower-friction selection flow default (2 hours).
    pub fn selection() -> Self {
        Self(Duration::hours(2))
    }

    pub fn duration(self) -> Duration {
        self.0
    }

    pub fn expires_at(self, from: DateTime<Utc>) -> DateTime<Utc> {
        from + self.0
    }
}

/// Which flow a claim comes from; each has its own configured default.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HoldFlow {
    Reservation,
    Selection,
}

/// Configured defaults per flow.
#[derive(Debug, Clone, Copy)]
pub struct HoldPolicy {
    pub reservation: HoldWindow,
    pub selection: HoldWindow,
}

impl HoldPolicy {
    pub fn from_config(config: &Config) -> SponsorshipResult<Self> {
        Ok(Self {
            reservation: HoldWindow::hours(config.reservation_hold_hours)?,
            selection: HoldWindow::hours(config.selection_hold_hours)?,
        })
    }

    pub fn window_for(&self, flow: HoldFlow) -> HoldWindow {
        match flow {
            HoldFlow::Reservation => self.reservation,
            HoldFlow::Selection => self.selection,
        }
    }
}

impl Default for HoldPolicy {
    fn default() -> Self {
        Self {
            reservation: HoldWindow::reservation(),
            selection: HoldWindow::selection(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rejects_non_positive_and_oversized_windows() {
        assert!(HoldWindow::hours(0).is_err());
        assert!(HoldWindow::hours(-4).is_err());
        assert!(HoldWindow::hours(MAX_HOLD_DAYS * 24 + 1).is_err());
        assert!(HoldWindow::hours(MAX_HOLD_DAYS * 24).is_ok());
    }

    #[test]
    fn test_presets() {
        assert_eq!(HoldWindow::reservation().duration(), Duration::hours(48));
        assert_eq!(HoldWindow::selection().duration(), Duration::hours(2));
        let policy = HoldPolicy::default();
        assert_eq!(policy.window_for(HoldFlow::Selection), HoldWindow::selection());
    }

    #[test]
    fn test_expires_at_adds_window() {
        let now = Utc::now();
        assert_eq!(
            HoldWindow::selection().expires_at(now),
            now + Duration::hours(2)
        );
    }
}
