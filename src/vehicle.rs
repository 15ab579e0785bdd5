use std::sync::Arc;

use log::{info, warn};

use crate::config::VehicleConfig;
use crate::error::AppError;
use crate::gpio::{GpioBackend, PinHandle};
use crate::motor::{MotorDriver, MotorState};

/// Optional indicator outputs. An absent light turns every operation on it
/// into a no-op.
pub struct Lights<B: GpioBackend> {
    left_blinker: Option<PinHandle<B>>,
    right_blinker: Option<PinHandle<B>>,
    brake: Option<PinHandle<B>>,
}

impl<B: GpioBackend> Lights<B> {
    fn iter_mut(&mut self) -> impl Iterator<Item = &mut PinHandle<B>> {
        [
            self.left_blinker.as_mut(),
            self.right_blinker.as_mut(),
            self.brake.as_mut(),
        ]
        .into_iter()
        .flatten()
    }
}

fn set_light<B: GpioBackend>(light: &Option<PinHandle<B>>, value: u8) -> Result<(), AppError> {
    match light {
        Some(pin) => pin.write_value(value),
        None => Ok(()),
    }
}

/// Two-motor differential-drive vehicle with optional indicator lights.
///
/// Motion is a sequence of pin writes, not a tracked mode. Indicators are
/// independent of motion: a light switched on by a maneuver stays on through
/// later maneuvers and [`Vehicle::stop`] until it is switched off explicitly
/// or the vehicle is cleaned up.
///
/// A vehicle whose [`Vehicle::init`] was attempted releases its pins on drop
/// if [`Vehicle::cleanup`] has not already done so.
pub struct Vehicle<B: GpioBackend> {
    left: MotorDriver<B>,
    right: MotorDriver<B>,
    lights: Lights<B>,
    armed: bool,
}

impl<B: GpioBackend> Vehicle<B> {
    pub fn new(backend: Arc<B>, config: &VehicleConfig) -> Self {
        let light = |pin: Option<u32>| pin.map(|p| PinHandle::new(backend.clone(), p));
        Self {
            left: MotorDriver::new(backend.clone(), "left", config.left),
            right: MotorDriver::new(backend.clone(), "right", config.right),
            lights: Lights {
                left_blinker: light(config.lights.left_blinker),
                right_blinker: light(config.lights.right_blinker),
                brake: light(config.lights.brake),
            },
            armed: false,
        }
    }

    pub fn left(&self) -> &MotorDriver<B> {
        &self.left
    }

    pub fn right(&self) -> &MotorDriver<B> {
        &self.right
    }

    /// Exports and configures every owned pin, then stops both motors.
    /// Any failure aborts; the vehicle must not be driven afterwards.
    pub fn init(&mut self) -> Result<(), AppError> {
        self.armed = true;
        self.left.setup()?;
        self.right.setup()?;
        for light in self.lights.iter_mut() {
            light.setup_output()?;
        }
        self.stop()?;
        info!("vehicle initialized");
        Ok(())
    }

    pub fn forward(&self) -> Result<(), AppError> {
        self.brake_off()?;
        self.left.forward()?;
        self.right.forward()
    }

    pub fn backward(&self) -> Result<(), AppError> {
        self.brake_on()?;
        self.left.backward()?;
        self.right.backward()
    }

    pub fn pivot_left(&self) -> Result<(), AppError> {
        self.blinker_left_on()?;
        self.left.backward()?;
        self.right.forward()
    }

    pub fn pivot_right(&self) -> Result<(), AppError> {
        self.blinker_right_on()?;
        self.left.forward()?;
        self.right.backward()
    }

    /// Stops both motors. Lights are left as they are.
    pub fn stop(&self) -> Result<(), AppError> {
        self.left.stop()?;
        self.right.stop()
    }

    pub fn blinker_left_on(&self) -> Result<(), AppError> {
        set_light(&self.lights.left_blinker, 1)
    }

    pub fn blinker_left_off(&self) -> Result<(), AppError> {
        set_light(&self.lights.left_blinker, 0)
    }

    pub fn blinker_right_on(&self) -> Result<(), AppError> {
        set_light(&self.lights.right_blinker, 1)
    }

    pub fn blinker_right_off(&self) -> Result<(), AppError> {
        set_light(&self.lights.right_blinker, 0)
    }

    pub fn brake_on(&self) -> Result<(), AppError> {
        set_light(&self.lights.brake, 1)
    }

    pub fn brake_off(&self) -> Result<(), AppError> {
        set_light(&self.lights.brake, 0)
    }

    pub fn motor_states(&self) -> Result<(MotorState, MotorState), AppError> {
        Ok((self.left.state()?, self.right.state()?))
    }

    /// Stops, switches every light off and unexports every owned pin.
    /// Best effort: failures are logged, never returned, so this is safe on a
    /// vehicle that was never (or only partly) initialized.
    pub fn cleanup(&mut self) {
        self.left.stop_best_effort();
        self.right.stop_best_effort();

        let steps: [(&str, fn(&Self) -> Result<(), AppError>); 3] = [
            ("brake off", Self::brake_off),
            ("left blinker off", Self::blinker_left_off),
            ("right blinker off", Self::blinker_right_off),
        ];
        for (what, step) in steps {
            if let Err(e) = step(self) {
                warn!("cleanup {what}: {e}");
            }
        }

        self.left.release();
        self.right.release();
        for light in self.lights.iter_mut() {
            light.unexport();
        }
        self.armed = false;
        info!("vehicle released");
    }
}

impl<B: GpioBackend> Drop for Vehicle<B> {
    fn drop(&mut self) {
        if self.armed {
            warn!("vehicle dropped without cleanup, releasing pins");
            self.cleanup();
        }
    }
}
