use std::time::Duration;

use log::{debug, warn};

use crate::config::WatchConfig;
use crate::error::AppError;
use crate::gpio::{EdgeSource, GpioBackend, PinHandle, Readiness, parse_level};

const VALUE_READ_BUFFER: usize = 64;

#[derive(Debug)]
pub enum WatchOutcome {
    /// The wait timed out (or woke without a value transition).
    NoEvent,
    /// A transition was consumed. `index` counts events from 0; `level` is
    /// the value read back, when it parsed.
    Event { index: u32, level: Option<u8> },
    /// The wait failed but the failure budget is not exhausted.
    WaitError(AppError),
}

/// Turns kernel edge notifications on one value descriptor into a bounded
/// stream of [`WatchOutcome`]s.
///
/// The session ends once `max_events` events were consumed; the descriptor is
/// then closed by [`EdgeWatcher::close`] or on drop. Failures of the wait
/// itself are tolerated until `max_consecutive_failures` happen in a row, at
/// which point [`EdgeWatcher::next_outcome`] returns a fatal error.
pub struct EdgeWatcher<S: EdgeSource> {
    source: Option<S>,
    timeout: Duration,
    max_events: u32,
    events: u32,
    consecutive_failures: u32,
    max_consecutive_failures: u32,
}

impl<S: EdgeSource> EdgeWatcher<S> {
    pub fn new(source: S, config: &WatchConfig) -> Self {
        Self {
            source: Some(source),
            timeout: config.timeout(),
            max_events: config.max_events,
            events: 0,
            consecutive_failures: 0,
            max_consecutive_failures: config.max_consecutive_failures.max(1),
        }
    }

    /// Opens the value descriptor of an exported input pin and starts a session.
    pub fn open<B>(pin: &PinHandle<B>, config: &WatchConfig) -> Result<Self, AppError>
    where
        B: GpioBackend<Watch = S>,
    {
        let source = pin.open_value_for_watch()?;
        debug!("watching pin {} for {:?} edges", pin.pin(), pin.edge());
        Ok(Self::new(source, config))
    }

    pub fn events(&self) -> u32 {
        self.events
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }

    pub fn is_open(&self) -> bool {
        self.source.is_some()
    }

    pub fn is_terminal(&self) -> bool {
        self.source.is_none() || self.events >= self.max_events
    }

    /// Blocks for at most the configured timeout and reports what happened.
    pub fn next_outcome(&mut self) -> Result<WatchOutcome, AppError> {
        if self.is_terminal() {
            return Err(AppError::InvalidState("watch session has ended".into()));
        }
        let Some(source) = self.source.as_mut() else {
            return Err(AppError::InvalidState("watch descriptor closed".into()));
        };

        let result = match source.wait(self.timeout) {
            Ok(Readiness::TimedOut) | Ok(Readiness::Other) => Ok(None),
            Ok(Readiness::Priority) => consume_pending(source).map(Some),
            Err(e) => Err(e),
        };

        match result {
            Ok(None) => {
                self.consecutive_failures = 0;
                Ok(WatchOutcome::NoEvent)
            }
            Ok(Some(level)) => {
                self.consecutive_failures = 0;
                let index = self.events;
                self.events += 1;
                Ok(WatchOutcome::Event { index, level })
            }
            Err(e) => {
                self.consecutive_failures += 1;
                if self.consecutive_failures >= self.max_consecutive_failures {
                    return Err(AppError::WaitFailure(format!(
                        "{} consecutive wait failures, last: {e}",
                        self.consecutive_failures
                    )));
                }
                warn!(
                    "wait failed ({}/{}): {e}",
                    self.consecutive_failures, self.max_consecutive_failures
                );
                Ok(WatchOutcome::WaitError(e))
            }
        }
    }

    /// Closes the descriptor. Later calls are no-ops.
    pub fn close(&mut self) {
        if self.source.take().is_some() {
            debug!("watch descriptor closed after {} events", self.events);
        }
    }
}

/// Rewinds and drains the value attribute so the kernel re-arms the
/// notification. The edge itself is the event; the level is informational.
fn consume_pending<S: EdgeSource>(source: &mut S) -> Result<Option<u8>, AppError> {
    source.rewind()?;
    let mut buf = [0u8; VALUE_READ_BUFFER];
    let n = source.read_pending(&mut buf)?;
    Ok(parse_level(&buf[..n]).ok())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{MockEdgeSource, MockWait, WatchOp};

    fn config(max_events: u32, max_failures: u32) -> WatchConfig {
        WatchConfig {
            max_events,
            max_consecutive_failures: max_failures,
            ..WatchConfig::default()
        }
    }

    #[test]
    fn timeout_is_not_counted() {
        let source = MockEdgeSource::new([MockWait::Timeout, MockWait::Edge(0)]);
        let mut watcher = EdgeWatcher::new(source, &config(10, 3));

        assert!(matches!(
            watcher.next_outcome().unwrap(),
            WatchOutcome::NoEvent
        ));
        assert_eq!(watcher.events(), 0);
        assert!(matches!(
            watcher.next_outcome().unwrap(),
            WatchOutcome::Event {
                index: 0,
                level: Some(0)
            }
        ));
        assert_eq!(watcher.events(), 1);
    }

    #[test]
    fn every_read_is_preceded_by_rewind() {
        let source = MockEdgeSource::new([
            MockWait::Edge(0),
            MockWait::Timeout,
            MockWait::Edge(1),
            MockWait::Spurious,
            MockWait::Edge(0),
        ]);
        let ops = source.ops_handle();
        let mut watcher = EdgeWatcher::new(source, &config(3, 3));
        while !watcher.is_terminal() {
            watcher.next_outcome().unwrap();
        }
        watcher.close();

        let ops = ops.lock().clone();
        let reads: Vec<usize> = ops
            .iter()
            .enumerate()
            .filter(|(_, op)| matches!(op, WatchOp::Read { .. }))
            .map(|(i, _)| i)
            .collect();
        assert_eq!(reads.len(), 3);
        for i in reads {
            assert_eq!(ops[i - 1], WatchOp::Rewind);
            assert!(matches!(ops[i], WatchOp::Read { offset: 0, bytes: 2 }));
        }
        assert_eq!(ops.last(), Some(&WatchOp::Close));
    }

    #[test]
    fn terminal_after_bound_and_closed_once() {
        let source = MockEdgeSource::new([MockWait::Edge(0), MockWait::Edge(0)]);
        let ops = source.ops_handle();
        let mut watcher = EdgeWatcher::new(source, &config(2, 3));
        watcher.next_outcome().unwrap();
        watcher.next_outcome().unwrap();
        assert!(watcher.is_terminal());
        assert!(matches!(
            watcher.next_outcome(),
            Err(AppError::InvalidState(_))
        ));

        watcher.close();
        watcher.close();
        drop(watcher);
        let closes = ops
            .lock()
            .iter()
            .filter(|op| **op == WatchOp::Close)
            .count();
        assert_eq!(closes, 1);
    }

    #[test]
    fn wait_errors_escalate_after_threshold() {
        let source = MockEdgeSource::new([MockWait::Fail, MockWait::Fail, MockWait::Fail]);
        let mut watcher = EdgeWatcher::new(source, &config(10, 3));
        assert!(matches!(
            watcher.next_outcome().unwrap(),
            WatchOutcome::WaitError(_)
        ));
        assert!(matches!(
            watcher.next_outcome().unwrap(),
            WatchOutcome::WaitError(_)
        ));
        assert!(matches!(
            watcher.next_outcome(),
            Err(AppError::WaitFailure(_))
        ));
    }

    #[test]
    fn success_resets_failure_streak() {
        let source = MockEdgeSource::new([
            MockWait::Fail,
            MockWait::Timeout,
            MockWait::Fail,
            MockWait::Edge(1),
            MockWait::Fail,
        ]);
        let mut watcher = EdgeWatcher::new(source, &config(10, 2));
        for _ in 0..5 {
            watcher.next_outcome().unwrap();
        }
        assert_eq!(watcher.consecutive_failures(), 1);
        assert_eq!(watcher.events(), 1);
    }

    #[test]
    fn zero_bound_is_terminal_immediately() {
        let watcher = EdgeWatcher::new(MockEdgeSource::new([]), &config(0, 1));
        assert!(watcher.is_terminal());
    }
}
