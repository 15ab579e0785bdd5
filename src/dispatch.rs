use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};

use log::{debug, info};

use crate::error::AppError;
use crate::gpio::{EdgeSource, GpioBackend};
use crate::vehicle::Vehicle;
use crate::watcher::{EdgeWatcher, WatchOutcome};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Forward,
    PivotLeft,
    PivotRight,
    Backward,
    Stop,
}

pub const ACTION_CYCLE: [Action; 5] = [
    Action::Forward,
    Action::PivotLeft,
    Action::PivotRight,
    Action::Backward,
    Action::Stop,
];

/// Maps the n-th button press (counting from 0) to a maneuver.
pub fn action(index: u32) -> Action {
    ACTION_CYCLE[(index % ACTION_CYCLE.len() as u32) as usize]
}

impl Action {
    pub fn apply<B: GpioBackend>(self, vehicle: &Vehicle<B>) -> Result<(), AppError> {
        match self {
            Action::Forward => vehicle.forward(),
            Action::PivotLeft => vehicle.pivot_left(),
            Action::PivotRight => vehicle.pivot_right(),
            Action::Backward => vehicle.backward(),
            Action::Stop => vehicle.stop(),
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Action::Forward => "forward",
            Action::PivotLeft => "pivot left",
            Action::PivotRight => "pivot right",
            Action::Backward => "backward",
            Action::Stop => "stop",
        })
    }
}

/// One user-facing line of session progress.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Status {
    Timeout,
    Press { index: u32 },
    Move(Action),
    WaitFailed(String),
    Cancelled,
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Status::Timeout => write!(f, "Poll timed out, no button press"),
            Status::Press { index } => write!(f, "Received a button press...{index}"),
            Status::Move(action) => write!(f, "[MOVE] {action}"),
            Status::WaitFailed(reason) => write!(f, "Poll failed...{reason}"),
            Status::Cancelled => write!(f, "Cancelled, shutting down"),
        }
    }
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SessionReport {
    pub events: u32,
    pub timeouts: u32,
    pub wait_errors: u32,
    pub cancelled: bool,
}

/// Runs the watcher until its event bound, cancellation, or a fatal error,
/// handing every outcome to `handle`. The descriptor is closed on every exit
/// path.
///
/// `cancel` is checked before each wait, so a cancellation is noticed within
/// one wait timeout.
pub fn run_session<S, F>(
    watcher: &mut EdgeWatcher<S>,
    cancel: &AtomicBool,
    mut handle: F,
) -> Result<SessionReport, AppError>
where
    S: EdgeSource,
    F: FnMut(Status) -> Result<(), AppError>,
{
    let result = session_loop(watcher, cancel, &mut handle);
    watcher.close();
    result
}

fn session_loop<S, F>(
    watcher: &mut EdgeWatcher<S>,
    cancel: &AtomicBool,
    handle: &mut F,
) -> Result<SessionReport, AppError>
where
    S: EdgeSource,
    F: FnMut(Status) -> Result<(), AppError>,
{
    let mut report = SessionReport::default();
    while !watcher.is_terminal() {
        if cancel.load(Ordering::Relaxed) {
            report.cancelled = true;
            handle(Status::Cancelled)?;
            break;
        }
        match watcher.next_outcome()? {
            WatchOutcome::NoEvent => {
                report.timeouts += 1;
                handle(Status::Timeout)?;
            }
            WatchOutcome::Event { index, level } => {
                report.events += 1;
                debug!("event {index}, level {level:?}");
                handle(Status::Press { index })?;
            }
            WatchOutcome::WaitError(e) => {
                report.wait_errors += 1;
                handle(Status::WaitFailed(e.to_string()))?;
            }
        }
    }
    Ok(report)
}

/// Drives `vehicle` with one maneuver per button press.
pub fn drive_vehicle<B, S, R>(
    vehicle: &Vehicle<B>,
    watcher: &mut EdgeWatcher<S>,
    cancel: &AtomicBool,
    mut report: R,
) -> Result<SessionReport, AppError>
where
    B: GpioBackend,
    S: EdgeSource,
    R: FnMut(&Status),
{
    let summary = run_session(watcher, cancel, |status| {
        report(&status);
        if let Status::Press { index } = status {
            let next = action(index);
            report(&Status::Move(next));
            next.apply(vehicle)?;
        }
        Ok(())
    })?;
    info!(
        "drive session finished: {} presses, {} timeouts, {} wait errors",
        summary.events, summary.timeouts, summary.wait_errors
    );
    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_cycle_is_fixed() {
        let actions: Vec<Action> = (0..5).map(action).collect();
        assert_eq!(
            actions,
            vec![
                Action::Forward,
                Action::PivotLeft,
                Action::PivotRight,
                Action::Backward,
                Action::Stop
            ]
        );
    }

    #[test]
    fn cycle_repeats() {
        for i in 0..20 {
            assert_eq!(action(i + 5), action(i));
        }
        assert_eq!(action(u32::MAX), action(u32::MAX % 5));
    }

    #[test]
    fn status_lines() {
        assert_eq!(
            Status::Press { index: 3 }.to_string(),
            "Received a button press...3"
        );
        assert_eq!(
            Status::Move(Action::PivotLeft).to_string(),
            "[MOVE] pivot left"
        );
    }
}
