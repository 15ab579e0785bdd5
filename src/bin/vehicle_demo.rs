use log::{error, info, warn};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use clap::Parser;

use gpiocar::{
    ACTION_CYCLE, AppConfig, AppError, EdgeWatcher, LightPins, MotorPins, PinHandle,
    SysfsBackend, Vehicle, VehicleConfig, drive_vehicle,
};

/// Drives a two-motor H-bridge vehicle from a single button: every press
/// runs the next maneuver of forward, pivot left, pivot right, backward, stop.
#[derive(Parser)]
#[command(version, about)]
struct Cli {
    left_in1: u32,
    left_in2: u32,
    right_in1: u32,
    right_in2: u32,
    /// Input pin reading the button
    gpio_in: u32,
    /// Output pin driving the status LED
    gpio_out_led: u32,
    #[arg(long)]
    left_blinker: Option<u32>,
    #[arg(long)]
    right_blinker: Option<u32>,
    #[arg(long)]
    brake: Option<u32>,
    /// JSON config file (falls back to $GPIOCAR_CONFIG)
    #[arg(long)]
    config: Option<PathBuf>,
    /// Offset added to logical pin numbers, e.g. 512 on newer Raspberry Pi kernels
    #[arg(long)]
    pin_base: Option<u32>,
    #[arg(long)]
    timeout_ms: Option<u64>,
    #[arg(long)]
    max_events: Option<u32>,
}

impl Cli {
    fn vehicle(&self) -> VehicleConfig {
        VehicleConfig {
            left: MotorPins {
                primary: self.left_in1,
                secondary: self.left_in2,
            },
            right: MotorPins {
                primary: self.right_in1,
                secondary: self.right_in2,
            },
            lights: LightPins {
                left_blinker: self.left_blinker,
                right_blinker: self.right_blinker,
                brake: self.brake,
            },
        }
    }
}

fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let cli = Cli::parse();

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{e}");
            ExitCode::FAILURE
        }
    }
}

fn load_config(cli: &Cli) -> Result<AppConfig, AppError> {
    let mut config = AppConfig::resolve(cli.config.as_deref())?;
    if let Some(base) = cli.pin_base {
        config.sysfs.pin_base = base;
    }
    if let Some(ms) = cli.timeout_ms {
        config.watch.timeout_ms = ms;
    }
    if let Some(n) = cli.max_events {
        config.watch.max_events = n;
    }
    let vehicle = cli.vehicle();
    let vehicle_pins = vehicle.pins();
    for (role, pin) in [("button", cli.gpio_in), ("status LED", cli.gpio_out_led)] {
        if vehicle_pins.contains(&pin) {
            return Err(AppError::Config(format!(
                "{role} pin {pin} is also used by the vehicle"
            )));
        }
    }
    if cli.gpio_in == cli.gpio_out_led {
        return Err(AppError::Config(
            "button and status LED need distinct pins".into(),
        ));
    }
    config.vehicle = Some(vehicle);
    config.validate()?;
    Ok(config)
}

fn run(cli: Cli) -> Result<(), AppError> {
    let config = load_config(&cli)?;
    let backend = Arc::new(SysfsBackend::new(&config.sysfs)?);

    let cancel = Arc::new(AtomicBool::new(false));
    {
        let cancel = cancel.clone();
        ctrlc::set_handler(move || cancel.store(true, Ordering::Relaxed))
            .map_err(|e| AppError::InvalidState(format!("install Ctrl-C handler: {e}")))?;
    }

    let mut led = PinHandle::new(backend.clone(), cli.gpio_out_led);
    let mut button = PinHandle::new(backend.clone(), cli.gpio_in);
    let mut vehicle = Vehicle::new(backend, &cli.vehicle());

    let result = drive(&mut led, &mut button, &mut vehicle, &config, &cancel);

    vehicle.cleanup();
    if led.is_exported()
        && let Err(e) = led.write_value(0)
    {
        warn!("switching status LED off: {e}");
    }
    led.unexport();
    button.unexport();
    result
}

fn drive(
    led: &mut PinHandle<SysfsBackend>,
    button: &mut PinHandle<SysfsBackend>,
    vehicle: &mut Vehicle<SysfsBackend>,
    config: &AppConfig,
    cancel: &AtomicBool,
) -> Result<(), AppError> {
    led.setup_output()?;
    button.setup_input(config.watch.edge)?;
    led.write_value(1)?;
    vehicle.init()?;

    let mut watcher = EdgeWatcher::open(button, &config.watch)?;
    println!(
        "Press the button {} times; each press runs one move.",
        config.watch.max_events
    );
    let sequence: Vec<String> = ACTION_CYCLE
        .iter()
        .enumerate()
        .map(|(i, a)| format!("{i}->{a}"))
        .collect();
    println!("Sequence: {}, then repeat", sequence.join(", "));

    let report = drive_vehicle(vehicle, &mut watcher, cancel, |status| println!("{status}"))?;
    vehicle.stop()?;
    info!(
        "{} moves executed{}",
        report.events,
        if report.cancelled { " before cancellation" } else { "" }
    );
    Ok(())
}
