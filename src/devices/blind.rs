//! Blind calibration and position model
//!
//! Blinds only report open/close/stop on their default property. Calibration
//! measures how long a full close and a full open take by watching the user
//! drive the blind end to end:
//!
//! ```text
//! phase 0  open   ─▶ 1  stop (fully open)   ─▶ 2  close ─▶ 3  stop (fully closed)
//!       ─▶ 4  open ─▶ 5  stop (fully open)   ─▶ done, or 6 awaiting accept/discard
//! ```
//!
//! From the measured travel times a position percentage (0 = open,
//! 100 = closed) is integrated over every movement that ends in a stop.

use std::time::Duration;

use super::events::{DefaultPropertyState, PropertyChange};
use super::types::{DeviceDefinition, PropertyValue, SessionId, TravelTimes};
use crate::notify::{Notifier, NotifyEvent};
use crate::{Error, Result};

pub const OPEN: &str = "open";
pub const CLOSE: &str = "close";
pub const STOP: &str = "stop";

/// Name of the server-provided position property
pub const PERCENTAGE: &str = "percentage";

/// Phase reached only when a previous calibration exists
pub const REVIEW_PHASE: u8 = 6;

const PROMPT_CLOSE: &str = "now close the blind and stop it when fully closed";
const PROMPT_OPEN: &str = "now open the blind and stop it when fully open";

/// Calibration in progress for one device
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CalibrationSession {
    pub target: SessionId,
    pub phase: u8,
    close_ms: Option<i64>,
    open_ms: Option<i64>,
}

impl CalibrationSession {
    /// Travel times measured so far
    #[must_use]
    pub const fn measured(&self) -> Option<TravelTimes> {
        match (self.close_ms, self.open_ms) {
            (Some(close_ms), Some(open_ms)) => Some(TravelTimes { close_ms, open_ms }),
            _ => None,
        }
    }
}

/// Result of feeding one default-property change to the calibration
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CalibrationStep {
    /// No calibration is running
    Idle,
    /// Moved to the next phase
    Advanced {
        note: &'static str,
        prompt: Option<&'static str>,
    },
    /// Same control pressed again; the phase is retried
    Repeated,
    /// Unexpected transition; calibration cancelled
    Aborted { reason: &'static str },
    /// First calibration finished
    Completed(TravelTimes),
    /// Recalibration measured; waiting for accept (open) or discard
    Review {
        measured: TravelTimes,
        current: TravelTimes,
    },
    /// New travel times accepted
    Accepted(TravelTimes),
    /// New travel times discarded
    Discarded,
}

/// Owns the single process-wide calibration slot
#[derive(Debug, Default)]
pub struct CalibrationCoordinator {
    active: Option<CalibrationSession>,
}

impl CalibrationCoordinator {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// The running calibration, if any
    #[must_use]
    pub const fn active(&self) -> Option<&CalibrationSession> {
        self.active.as_ref()
    }

    /// Whether the given session is under calibration
    #[must_use]
    pub fn is_target(&self, session: SessionId) -> bool {
        self.active.is_some_and(|a| a.target == session)
    }

    /// Claim the calibration slot for a device
    ///
    /// # Errors
    ///
    /// Returns `CalibrationBusy` if another calibration is running; the
    /// running one is left untouched
    pub fn begin(&mut self, target: SessionId, device: &str) -> Result<()> {
        if self.active.is_some() {
            return Err(Error::CalibrationBusy(format!(
                "cannot calibrate '{device}' while another blind is being calibrated"
            )));
        }
        self.active = Some(CalibrationSession {
            target,
            phase: 0,
            close_ms: None,
            open_ms: None,
        });
        Ok(())
    }

    /// Cancel the calibration of a session, if it is the one running
    ///
    /// Returns whether anything was cancelled.
    pub fn cancel(&mut self, session: SessionId) -> bool {
        if self.is_target(session) {
            self.active = None;
            true
        } else {
            false
        }
    }

    /// Advance the state machine on a default-property change
    ///
    /// `last_change_ms` is the time of the previous default-property change,
    /// before this one is recorded. `current` is the committed calibration.
    pub fn advance(
        &mut self,
        value: &PropertyValue,
        now_ms: i64,
        last_change_ms: Option<i64>,
        current: Option<TravelTimes>,
    ) -> CalibrationStep {
        let Some(mut session) = self.active else {
            return CalibrationStep::Idle;
        };

        let elapsed = last_change_ms.map(|since| now_ms - since);
        let step = match session.phase {
            0 if value.is(OPEN) => advance_to(&mut session, 1, "opening", None),
            0 => CalibrationStep::Aborted {
                reason: "blind did not open",
            },
            1 if value.is(STOP) => advance_to(&mut session, 2, "fully open", Some(PROMPT_CLOSE)),
            1 => not_stopped(value, OPEN),
            2 if value.is(CLOSE) => advance_to(&mut session, 3, "closing", None),
            2 => CalibrationStep::Aborted {
                reason: "blind did not close",
            },
            3 => match (value.is(STOP), elapsed) {
                (true, Some(elapsed)) => {
                    session.close_ms = Some(elapsed);
                    advance_to(&mut session, 4, "fully closed", Some(PROMPT_OPEN))
                }
                (true, None) => untimed_stop(),
                _ => not_stopped(value, CLOSE),
            },
            4 if value.is(OPEN) => advance_to(&mut session, 5, "opening", None),
            4 => CalibrationStep::Aborted {
                reason: "blind did not open",
            },
            5 => match (value.is(STOP), elapsed) {
                (true, Some(elapsed)) => {
                    session.open_ms = Some(elapsed);
                    match (session.measured(), current) {
                        (Some(measured), Some(current)) => {
                            session.phase = REVIEW_PHASE;
                            CalibrationStep::Review { measured, current }
                        }
                        (Some(measured), None) => CalibrationStep::Completed(measured),
                        (None, _) => CalibrationStep::Aborted {
                            reason: "close time was not measured",
                        },
                    }
                }
                (true, None) => untimed_stop(),
                _ => not_stopped(value, OPEN),
            },
            _ => match session.measured() {
                Some(measured) if value.is(OPEN) => CalibrationStep::Accepted(measured),
                _ => CalibrationStep::Discarded,
            },
        };

        self.active = match step {
            CalibrationStep::Advanced { .. }
            | CalibrationStep::Repeated
            | CalibrationStep::Review { .. } => Some(session),
            _ => None,
        };
        step
    }
}

fn advance_to(
    session: &mut CalibrationSession,
    phase: u8,
    note: &'static str,
    prompt: Option<&'static str>,
) -> CalibrationStep {
    session.phase = phase;
    CalibrationStep::Advanced { note, prompt }
}

/// A phase waiting for a stop saw something else: a repeat of the current
/// movement is absorbed, anything different aborts
fn not_stopped(value: &PropertyValue, moving: &str) -> CalibrationStep {
    if value.is(moving) {
        CalibrationStep::Repeated
    } else {
        CalibrationStep::Aborted {
            reason: "blind was not stopped",
        }
    }
}

const fn untimed_stop() -> CalibrationStep {
    CalibrationStep::Aborted {
        reason: "no previous transition to time against",
    }
}

/// Full travel time with the sign of the movement: closing raises the
/// percentage, opening lowers it
const fn signed_travel_ms(travel: TravelTimes, closing: bool) -> i64 {
    if closing {
        travel.close_ms
    } else {
        -travel.open_ms
    }
}

/// Integrate one movement into the position estimate
///
/// `previous` is the movement that just stopped. The result saturates at
/// 0 and 100: a blind left to run into its end stop reports the stop late.
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn update_percentage(
    percentage: f64,
    travel: TravelTimes,
    previous: &PropertyValue,
    elapsed_ms: i64,
) -> f64 {
    let full_ms = signed_travel_ms(travel, previous.is(CLOSE));
    if full_ms == 0 {
        return percentage.clamp(0.0, 100.0);
    }
    (percentage + 100.0 * elapsed_ms as f64 / full_ms as f64).clamp(0.0, 100.0)
}

/// Movement needed to bring a blind to a target percentage
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PercentageMove {
    pub direction: &'static str,
    pub duration: Duration,
}

/// Plan the movement from `current` to `target`; `None` if already there
#[must_use]
#[allow(
    clippy::cast_precision_loss,
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss
)]
pub fn plan_move(current: f64, target: f64, travel: TravelTimes) -> Option<PercentageMove> {
    let delta = target - current;
    if delta.abs() < f64::EPSILON {
        return None;
    }
    let closing = delta > 0.0;
    let delta_ms = delta * signed_travel_ms(travel, closing) as f64 / 100.0;
    Some(PercentageMove {
        direction: if closing { CLOSE } else { OPEN },
        duration: Duration::from_millis(delta_ms.abs().round() as u64),
    })
}

/// Blind-specific handling of a default-property change
///
/// Runs before `previous` is updated with this change. Returns true when the
/// definition changed and should be persisted.
pub fn on_default_changed(
    device: &mut DeviceDefinition,
    session: SessionId,
    previous: &DefaultPropertyState,
    calibration: &mut CalibrationCoordinator,
    change: &PropertyChange,
    notifier: &dyn Notifier,
) -> bool {
    if calibration.is_target(session) {
        let phase = calibration.active().map_or(0, |a| a.phase);
        let step = calibration.advance(
            &change.value,
            change.timestamp_ms,
            previous.last_change_ms,
            device.blind.travel,
        );
        return apply_step(device, phase, step, notifier);
    }

    if !change.value.is(STOP) {
        return false;
    }
    let Some(moving) = previous.last_value.as_ref().filter(|v| !v.is(STOP)) else {
        return false;
    };
    let (Some(travel), Some(percentage), Some(since)) = (
        device.blind.travel,
        device.blind.percentage,
        previous.last_change_ms,
    ) else {
        return false;
    };

    let updated = update_percentage(percentage, travel, moving, change.timestamp_ms - since);
    device.blind.percentage = Some(updated);
    tracing::debug!(device = %device.name, from = percentage, to = updated, "percentage updated");

    #[allow(clippy::cast_possible_truncation)]
    let rounded = updated.round() as i64;
    notifier.notify(
        &device.name,
        NotifyEvent::PropChanged {
            property: PERCENTAGE.to_string(),
            value: PropertyValue::Int(rounded),
        },
    );
    true
}

#[allow(clippy::cast_precision_loss)]
fn seconds(ms: i64) -> f64 {
    ms as f64 / 1000.0
}

fn apply_step(
    device: &mut DeviceDefinition,
    phase: u8,
    step: CalibrationStep,
    notifier: &dyn Notifier,
) -> bool {
    let name = device.name.clone();
    let message = |text: String| notifier.notify(&name, NotifyEvent::Message(text));

    match step {
        CalibrationStep::Idle => false,
        CalibrationStep::Advanced { note, prompt } => {
            tracing::info!(device = %name, phase, "calibration: {note}");
            if let Some(prompt) = prompt {
                message(prompt.to_string());
            }
            false
        }
        CalibrationStep::Repeated => {
            tracing::debug!(device = %name, phase, "calibration: repeated press ignored");
            false
        }
        CalibrationStep::Aborted { reason } => {
            tracing::warn!(device = %name, phase, reason, "calibration aborted");
            message(format!("calibration aborted: {reason}"));
            false
        }
        CalibrationStep::Completed(travel) => {
            device.blind.commit(travel);
            tracing::info!(device = %name, close_ms = travel.close_ms, open_ms = travel.open_ms, "calibration complete");
            message(format!(
                "calibration complete: close {:.1}s, open {:.1}s",
                seconds(travel.close_ms),
                seconds(travel.open_ms)
            ));
            true
        }
        CalibrationStep::Review { measured, current } => {
            message(format!(
                "measured close {:.1}s, open {:.1}s (current close {:.1}s, open {:.1}s); \
                 press open to accept, anything else to discard",
                seconds(measured.close_ms),
                seconds(measured.open_ms),
                seconds(current.close_ms),
                seconds(current.open_ms)
            ));
            false
        }
        CalibrationStep::Accepted(travel) => {
            device.blind.commit(travel);
            tracing::info!(device = %name, close_ms = travel.close_ms, open_ms = travel.open_ms, "recalibration accepted");
            message("new calibration accepted".to_string());
            true
        }
        CalibrationStep::Discarded => {
            tracing::info!(device = %name, "recalibration discarded");
            message("new calibration discarded, keeping the previous one".to_string());
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn text(value: &str) -> PropertyValue {
        PropertyValue::from(value)
    }

    /// Feed (value, time) pairs the way the pipeline does, tracking the last
    /// change time with the differing-value rule
    fn drive(
        coordinator: &mut CalibrationCoordinator,
        events: &[(&str, i64)],
        current: Option<TravelTimes>,
    ) -> Vec<CalibrationStep> {
        let mut state = DefaultPropertyState::default();
        events
            .iter()
            .map(|(value, at)| {
                let value = text(value);
                let step = coordinator.advance(&value, *at, state.last_change_ms, current);
                state.record(&value, *at);
                step
            })
            .collect()
    }

    fn started() -> (CalibrationCoordinator, SessionId) {
        let mut coordinator = CalibrationCoordinator::new();
        let id = SessionId::new();
        coordinator.begin(id, "blind1").unwrap();
        (coordinator, id)
    }

    const CANONICAL: [(&str, i64); 6] = [
        (OPEN, 0),
        (STOP, 1000),
        (CLOSE, 2000),
        (STOP, 5000),
        (OPEN, 6000),
        (STOP, 8000),
    ];

    #[test]
    fn first_calibration_completes_at_phase_five() {
        let (mut coordinator, _) = started();
        let steps = drive(&mut coordinator, &CANONICAL, None);
        assert_eq!(
            steps.last(),
            Some(&CalibrationStep::Completed(TravelTimes {
                close_ms: 3000,
                open_ms: 2000
            }))
        );
        assert!(coordinator.active().is_none());
    }

    #[test]
    fn recalibration_waits_for_review() {
        let (mut coordinator, _) = started();
        let current = TravelTimes {
            close_ms: 10_000,
            open_ms: 9000,
        };
        let steps = drive(&mut coordinator, &CANONICAL, Some(current));
        assert!(matches!(steps.last(), Some(CalibrationStep::Review { .. })));
        assert_eq!(coordinator.active().unwrap().phase, REVIEW_PHASE);

        let step = coordinator.advance(&text(OPEN), 9000, Some(8000), Some(current));
        assert_eq!(
            step,
            CalibrationStep::Accepted(TravelTimes {
                close_ms: 3000,
                open_ms: 2000
            })
        );
        assert!(coordinator.active().is_none());
    }

    #[test]
    fn review_discards_on_anything_but_open() {
        let (mut coordinator, _) = started();
        let current = TravelTimes {
            close_ms: 1,
            open_ms: 1,
        };
        drive(&mut coordinator, &CANONICAL, Some(current));
        let step = coordinator.advance(&text(CLOSE), 9000, Some(8000), Some(current));
        assert_eq!(step, CalibrationStep::Discarded);
        assert!(coordinator.active().is_none());
    }

    #[test]
    fn repeated_open_is_absorbed() {
        let (mut coordinator, _) = started();
        let events = [
            (OPEN, 0),
            (OPEN, 500),
            (STOP, 1000),
            (CLOSE, 2000),
            (STOP, 5000),
            (OPEN, 6000),
            (STOP, 8000),
        ];
        let steps = drive(&mut coordinator, &events, None);
        assert_eq!(steps[1], CalibrationStep::Repeated);
        assert_eq!(
            steps.last(),
            Some(&CalibrationStep::Completed(TravelTimes {
                close_ms: 3000,
                open_ms: 2000
            }))
        );
    }

    #[test]
    fn repeated_open_stays_in_phase_one() {
        let (mut coordinator, _) = started();
        drive(&mut coordinator, &[(OPEN, 0), (OPEN, 100), (OPEN, 200)], None);
        assert_eq!(coordinator.active().unwrap().phase, 1);
        assert_eq!(coordinator.active().unwrap().measured(), None);
    }

    #[test]
    fn unexpected_values_abort() {
        let (mut coordinator, _) = started();
        let steps = drive(&mut coordinator, &[(CLOSE, 0)], None);
        assert!(matches!(steps[0], CalibrationStep::Aborted { .. }));
        assert!(coordinator.active().is_none());

        let (mut coordinator, _) = started();
        let steps = drive(&mut coordinator, &[(OPEN, 0), (CLOSE, 10)], None);
        assert!(matches!(steps[1], CalibrationStep::Aborted { .. }));
        assert!(coordinator.active().is_none());

        let (mut coordinator, _) = started();
        let steps = drive(
            &mut coordinator,
            &[(OPEN, 0), (STOP, 10), (CLOSE, 20), (OPEN, 30)],
            None,
        );
        assert!(matches!(steps[3], CalibrationStep::Aborted { .. }));
        assert!(coordinator.active().is_none());
    }

    #[test]
    fn busy_slot_is_left_untouched() {
        let (mut coordinator, first) = started();
        drive(&mut coordinator, &[(OPEN, 0)], None);

        let err = coordinator.begin(SessionId::new(), "blind2").unwrap_err();
        assert!(matches!(err, Error::CalibrationBusy(_)));
        let active = coordinator.active().unwrap();
        assert_eq!(active.target, first);
        assert_eq!(active.phase, 1);
    }

    #[test]
    fn cancel_only_affects_target() {
        let (mut coordinator, id) = started();
        assert!(!coordinator.cancel(SessionId::new()));
        assert!(coordinator.cancel(id));
        assert!(coordinator.active().is_none());
    }

    #[test]
    fn percentage_moves_with_direction() {
        let travel = TravelTimes {
            close_ms: 3000,
            open_ms: 2000,
        };
        let closed_half = update_percentage(0.0, travel, &text(CLOSE), 1500);
        assert!((closed_half - 50.0).abs() < 1e-9);

        let opened = update_percentage(50.0, travel, &text(OPEN), 500);
        assert!((opened - 25.0).abs() < 1e-9);
    }

    #[test]
    fn percentage_saturates() {
        let travel = TravelTimes {
            close_ms: 3000,
            open_ms: 2000,
        };
        assert!((update_percentage(80.0, travel, &text(CLOSE), 10_000) - 100.0).abs() < 1e-9);
        assert!(update_percentage(20.0, travel, &text(OPEN), 10_000).abs() < 1e-9);
    }

    #[test]
    fn plan_move_to_half_closed() {
        let travel = TravelTimes {
            close_ms: 3000,
            open_ms: 2000,
        };
        let planned = plan_move(0.0, 50.0, travel).unwrap();
        assert_eq!(planned.direction, CLOSE);
        assert_eq!(planned.duration, Duration::from_millis(1500));

        let planned = plan_move(50.0, 0.0, travel).unwrap();
        assert_eq!(planned.direction, OPEN);
        assert_eq!(planned.duration, Duration::from_millis(1000));

        assert_eq!(plan_move(40.0, 40.0, travel), None);
    }
}
