use std::sync::Arc;
use std::time::Duration;

use log::{debug, info};

use crate::config::{Direction, EdgeDetect};
use crate::error::AppError;

/// Result of one bounded wait on a watched value descriptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Readiness {
    TimedOut,
    /// The kernel flagged a value transition (priority readiness).
    Priority,
    /// The wait returned without the priority flag set.
    Other,
}

/// An open, non-blocking, read-only descriptor on a pin's value attribute.
///
/// Dropping the source closes the descriptor.
pub trait EdgeSource {
    fn wait(&mut self, timeout: Duration) -> Result<Readiness, AppError>;
    /// Moves the read position back to offset 0.
    fn rewind(&mut self) -> Result<(), AppError>;
    fn read_pending(&mut self, buf: &mut [u8]) -> Result<usize, AppError>;
}

/// Kernel-side pin operations, keyed by logical pin number.
///
/// Implementations translate the logical number into whatever the kernel
/// expects; callers never see physical numbers.
pub trait GpioBackend: Send + Sync {
    type Watch: EdgeSource;

    fn export(&self, pin: u32) -> Result<(), AppError>;
    fn unexport(&self, pin: u32) -> Result<(), AppError>;
    fn is_exported(&self, pin: u32) -> bool;
    fn set_direction(&self, pin: u32, direction: Direction) -> Result<(), AppError>;
    fn set_edge(&self, pin: u32, edge: EdgeDetect) -> Result<(), AppError>;
    fn read_value(&self, pin: u32) -> Result<u8, AppError>;
    fn write_value(&self, pin: u32, value: u8) -> Result<(), AppError>;
    fn open_value_for_watch(&self, pin: u32) -> Result<Self::Watch, AppError>;
}

/// Parses the contents of a value attribute: one decimal digit, optionally
/// followed by a newline.
pub fn parse_level(raw: &[u8]) -> Result<u8, AppError> {
    let text = std::str::from_utf8(raw)
        .map_err(|_| AppError::IoFailure("value attribute is not utf-8".into()))?;
    match text.trim() {
        "0" => Ok(0),
        "1" => Ok(1),
        other => Err(AppError::IoFailure(format!(
            "unexpected value attribute content {other:?}"
        ))),
    }
}

/// One logical pin under this process's control.
///
/// Tracks what the process has configured so that operations issued out of
/// order fail locally instead of poking attribute files that do not exist.
pub struct PinHandle<B: GpioBackend> {
    pin: u32,
    backend: Arc<B>,
    exported: bool,
    direction: Option<Direction>,
    edge: EdgeDetect,
}

impl<B: GpioBackend> PinHandle<B> {
    pub fn new(backend: Arc<B>, pin: u32) -> Self {
        Self {
            pin,
            backend,
            exported: false,
            direction: None,
            edge: EdgeDetect::None,
        }
    }

    pub fn pin(&self) -> u32 {
        self.pin
    }

    pub fn is_exported(&self) -> bool {
        self.exported
    }

    pub fn direction(&self) -> Option<Direction> {
        self.direction
    }

    pub fn edge(&self) -> EdgeDetect {
        self.edge
    }

    fn require_exported(&self) -> Result<(), AppError> {
        if self.exported {
            Ok(())
        } else {
            Err(AppError::ResourceUnavailable(format!(
                "pin {} is not exported",
                self.pin
            )))
        }
    }

    pub fn export(&mut self) -> Result<(), AppError> {
        self.backend.export(self.pin)?;
        self.exported = true;
        debug!("exported pin {}", self.pin);
        Ok(())
    }

    /// Best-effort release. Never fails the caller; a pin that was not
    /// exported is simply left alone.
    pub fn unexport(&mut self) {
        if let Err(e) = self.backend.unexport(self.pin) {
            debug!("unexport pin {} ignored: {e}", self.pin);
        }
        self.exported = false;
        self.direction = None;
        self.edge = EdgeDetect::None;
    }

    /// Exports the pin, first clearing any export left behind by an unclean
    /// previous run. Safe to call repeatedly.
    pub fn acquire(&mut self) -> Result<(), AppError> {
        if self.backend.is_exported(self.pin) {
            info!("pin {} already exported, reclaiming", self.pin);
        }
        self.unexport();
        self.export()
    }

    pub fn set_direction(&mut self, direction: Direction) -> Result<(), AppError> {
        self.require_exported()?;
        self.backend.set_direction(self.pin, direction)?;
        self.direction = Some(direction);
        if direction == Direction::Out {
            self.edge = EdgeDetect::None;
        }
        Ok(())
    }

    pub fn set_edge(&mut self, edge: EdgeDetect) -> Result<(), AppError> {
        self.require_exported()?;
        if edge != EdgeDetect::None && self.direction != Some(Direction::In) {
            return Err(AppError::InvalidState(format!(
                "edge detection requires pin {} to be an input",
                self.pin
            )));
        }
        self.backend.set_edge(self.pin, edge)?;
        self.edge = edge;
        Ok(())
    }

    pub fn write_value(&self, value: u8) -> Result<(), AppError> {
        if value > 1 {
            return Err(AppError::InvalidValue("Value must be 0 or 1".into()));
        }
        self.require_exported()?;
        if self.direction != Some(Direction::Out) {
            return Err(AppError::InvalidState(format!(
                "pin {} must be an output to set value",
                self.pin
            )));
        }
        self.backend.write_value(self.pin, value)
    }

    /// Reads the current level. For outputs the kernel reports the last
    /// written value.
    pub fn read_value(&self) -> Result<u8, AppError> {
        self.require_exported()?;
        self.backend.read_value(self.pin)
    }

    /// Opens the value attribute for edge watching. The returned source owns
    /// its descriptor; close it (drop it) before unexporting the pin.
    pub fn open_value_for_watch(&self) -> Result<B::Watch, AppError> {
        self.require_exported()?;
        if self.direction != Some(Direction::In) {
            return Err(AppError::InvalidState(format!(
                "pin {} must be an input to watch edges",
                self.pin
            )));
        }
        self.backend.open_value_for_watch(self.pin)
    }

    /// Acquires the pin as an output driven low.
    pub fn setup_output(&mut self) -> Result<(), AppError> {
        self.acquire()?;
        self.set_direction(Direction::Out)?;
        self.write_value(0)
    }

    /// Acquires the pin as an input reporting the given edge.
    pub fn setup_input(&mut self, edge: EdgeDetect) -> Result<(), AppError> {
        self.acquire()?;
        self.set_direction(Direction::In)?;
        self.set_edge(edge)
    }
}
