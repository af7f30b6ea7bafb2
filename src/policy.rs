//! Notification policy: threshold check with hysteresis.
//!
//! The policy is a pure function of the subscription's threshold, the AQI of
//! the last delivered notification and the current reading. It never touches
//! storage; the dispatcher persists the new state only after delivery.

use crate::entity::AqiThreshold;

/// Minimum swing from the last alert that re-triggers a fixed threshold.
pub const FIXED_THRESHOLD_SWING: i32 = 20;

/// Minimum change from the last alert for [`AqiThreshold::AnyChange`].
pub const ANY_CHANGE_DELTA: i32 = 15;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotificationDecision {
    Notify,
    /// The reading is below a fixed threshold.
    BelowThreshold,
    /// The reading moved less than the hysteresis band since the last alert.
    WithinHysteresis { last_notified: i32 },
}

impl NotificationDecision {
    pub fn should_notify(&self) -> bool {
        matches!(self, Self::Notify)
    }
}

pub fn decide(
    threshold: AqiThreshold,
    last_notified: Option<i32>,
    current_aqi: i32,
) -> NotificationDecision {
    let band = match threshold {
        AqiThreshold::Fixed(limit) => {
            if (current_aqi as i64) < limit.get() as i64 {
                return NotificationDecision::BelowThreshold;
            }
            FIXED_THRESHOLD_SWING
        }
        AqiThreshold::AnyChange => ANY_CHANGE_DELTA,
    };

    match last_notified {
        None => NotificationDecision::Notify,
        Some(last) if (current_aqi as i64 - last as i64).abs() >= band as i64 => {
            NotificationDecision::Notify
        }
        Some(last) => NotificationDecision::WithinHysteresis {
            last_notified: last,
        },
    }
}
