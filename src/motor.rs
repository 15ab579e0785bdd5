use std::sync::Arc;

use log::{debug, warn};

use crate::config::{Direction, MotorPins};
use crate::error::AppError;
use crate::gpio::{GpioBackend, PinHandle};

/// Direction of one motor as reported by its two H-bridge inputs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MotorState {
    Forward,
    Backward,
    Stopped,
    /// Both inputs high; most bridges brake or short in this state.
    Conflicting,
}

/// One H-bridge channel: primary input high drives forward, secondary input
/// high drives backward.
///
/// Holds no notion of the current direction; [`MotorDriver::state`] reads it
/// back from the pins.
pub struct MotorDriver<B: GpioBackend> {
    name: &'static str,
    primary: PinHandle<B>,
    secondary: PinHandle<B>,
}

impl<B: GpioBackend> MotorDriver<B> {
    pub fn new(backend: Arc<B>, name: &'static str, pins: MotorPins) -> Self {
        Self {
            name,
            primary: PinHandle::new(backend.clone(), pins.primary),
            secondary: PinHandle::new(backend, pins.secondary),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn primary(&self) -> &PinHandle<B> {
        &self.primary
    }

    pub fn secondary(&self) -> &PinHandle<B> {
        &self.secondary
    }

    pub fn setup(&mut self) -> Result<(), AppError> {
        for pin in [&mut self.primary, &mut self.secondary] {
            pin.acquire()?;
            pin.set_direction(Direction::Out)?;
        }
        debug!(
            "{} motor ready on pins {}/{}",
            self.name,
            self.primary.pin(),
            self.secondary.pin()
        );
        Ok(())
    }

    fn drive(&self, primary: u8, secondary: u8) -> Result<(), AppError> {
        self.primary.write_value(primary)?;
        self.secondary.write_value(secondary)
    }

    pub fn forward(&self) -> Result<(), AppError> {
        self.drive(1, 0)
    }

    pub fn backward(&self) -> Result<(), AppError> {
        self.drive(0, 1)
    }

    pub fn stop(&self) -> Result<(), AppError> {
        self.drive(0, 0)
    }

    /// Drives both inputs low, attempting each write even if the other fails.
    pub fn stop_best_effort(&self) {
        for pin in [&self.primary, &self.secondary] {
            if let Err(e) = pin.write_value(0) {
                warn!("{} motor: clearing pin {}: {e}", self.name, pin.pin());
            }
        }
    }

    pub fn state(&self) -> Result<MotorState, AppError> {
        Ok(
            match (self.primary.read_value()?, self.secondary.read_value()?) {
                (1, 0) => MotorState::Forward,
                (0, 1) => MotorState::Backward,
                (0, 0) => MotorState::Stopped,
                _ => MotorState::Conflicting,
            },
        )
    }

    pub fn release(&mut self) {
        self.primary.unexport();
        self.secondary.unexport();
    }
}
