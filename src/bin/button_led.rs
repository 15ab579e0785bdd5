use log::{error, info, warn};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use clap::Parser;

use gpiocar::{AppConfig, AppError, EdgeWatcher, PinHandle, SysfsBackend, run_session};

/// Lights an LED, then counts presses of a button until the event bound is
/// reached. Wire the button to pull the input low when pressed.
#[derive(Parser)]
#[command(version, about)]
struct Cli {
    /// Output pin driving the LED
    gpio_out: u32,
    /// Input pin reading the button
    gpio_in: u32,
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
    config.validate()?;
    if cli.gpio_out == cli.gpio_in {
        return Err(AppError::Config("LED and button need distinct pins".into()));
    }
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

    let mut led = PinHandle::new(backend.clone(), cli.gpio_out);
    let mut button = PinHandle::new(backend, cli.gpio_in);

    let result = watch_button(&mut led, &mut button, &config, &cancel);

    if led.is_exported()
        && let Err(e) = led.write_value(0)
    {
        warn!("switching LED off: {e}");
    }
    led.unexport();
    button.unexport();
    result
}

fn watch_button(
    led: &mut PinHandle<SysfsBackend>,
    button: &mut PinHandle<SysfsBackend>,
    config: &AppConfig,
    cancel: &AtomicBool,
) -> Result<(), AppError> {
    led.setup_output()?;
    button.setup_input(config.watch.edge)?;
    led.write_value(1)?;

    let mut watcher = EdgeWatcher::open(button, &config.watch)?;
    println!(
        "Press the button {} times (Ctrl-C to stop early)",
        config.watch.max_events
    );
    let report = run_session(&mut watcher, cancel, |status| {
        println!("{status}");
        Ok(())
    })?;
    info!("{} presses received", report.events);
    Ok(())
}
