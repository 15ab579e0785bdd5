use std::sync::Arc;
use std::sync::atomic::AtomicBool;

use gpiocar::backend::{MockAttribute, MockGpioBackend, MockWait};
use gpiocar::{
    Action, AppError, Direction, EdgeDetect, EdgeWatcher, GpioBackend, LightPins, MotorPins,
    MotorState, PinHandle, Status, Vehicle, VehicleConfig, WatchConfig, drive_vehicle,
};

fn bare_layout() -> VehicleConfig {
    VehicleConfig {
        left: MotorPins {
            primary: 2,
            secondary: 3,
        },
        right: MotorPins {
            primary: 4,
            secondary: 5,
        },
        lights: LightPins::default(),
    }
}

fn lit_layout() -> VehicleConfig {
    VehicleConfig {
        lights: LightPins {
            left_blinker: Some(20),
            right_blinker: Some(21),
            brake: Some(22),
        },
        ..bare_layout()
    }
}

fn values(backend: &MockGpioBackend, pins: &[u32]) -> Vec<Option<u8>> {
    pins.iter().map(|p| backend.line_value(*p)).collect()
}

#[test]
fn unexport_of_never_exported_pin_does_not_fail() {
    let backend = Arc::new(MockGpioBackend::default());
    for pin in [0, 7, 26, 511] {
        let mut handle = PinHandle::new(backend.clone(), pin);
        handle.unexport();
        assert!(!handle.is_exported());
    }
}

#[test]
fn output_level_reads_back() {
    let backend = Arc::new(MockGpioBackend::default());
    let mut pin = PinHandle::new(backend.clone(), 17);
    pin.export().unwrap();
    pin.set_direction(Direction::Out).unwrap();

    pin.write_value(1).unwrap();
    assert_eq!(pin.read_value().unwrap(), 1);
    pin.write_value(0).unwrap();
    assert_eq!(pin.read_value().unwrap(), 0);
}

#[test]
fn operations_before_export_are_unavailable() {
    let backend = Arc::new(MockGpioBackend::default());
    let mut pin = PinHandle::new(backend.clone(), 17);

    assert!(matches!(
        pin.set_direction(Direction::Out),
        Err(AppError::ResourceUnavailable(_))
    ));
    assert!(matches!(
        pin.write_value(1),
        Err(AppError::ResourceUnavailable(_))
    ));
    assert!(backend.journal().is_empty());
}

#[test]
fn write_requires_output_and_binary_value() {
    let backend = Arc::new(MockGpioBackend::default());
    let mut pin = PinHandle::new(backend.clone(), 18);
    pin.export().unwrap();
    pin.set_direction(Direction::In).unwrap();

    assert!(matches!(pin.write_value(1), Err(AppError::InvalidState(_))));
    assert!(matches!(pin.write_value(2), Err(AppError::InvalidValue(_))));
}

#[test]
fn second_export_is_rejected_but_acquire_reclaims() {
    let backend = Arc::new(MockGpioBackend::default());
    let mut stale = PinHandle::new(backend.clone(), 9);
    stale.export().unwrap();

    let mut fresh = PinHandle::new(backend.clone(), 9);
    assert!(matches!(
        fresh.export(),
        Err(AppError::ResourceUnavailable(_))
    ));
    fresh.acquire().unwrap();
    fresh.acquire().unwrap();
    assert!(backend.is_line_exported(9));
}

#[test]
fn edge_requires_input() {
    let backend = Arc::new(MockGpioBackend::default());
    let mut pin = PinHandle::new(backend.clone(), 18);
    pin.setup_output().unwrap();
    assert!(matches!(
        pin.set_edge(EdgeDetect::Falling),
        Err(AppError::InvalidState(_))
    ));

    pin.set_direction(Direction::In).unwrap();
    pin.set_edge(EdgeDetect::Falling).unwrap();
    assert_eq!(backend.line_edge(18), Some(EdgeDetect::Falling));
}

#[test]
fn end_to_end_bare_vehicle() {
    let backend = Arc::new(MockGpioBackend::default());
    let motors = [2, 3, 4, 5];
    let mut vehicle = Vehicle::new(backend.clone(), &bare_layout());

    vehicle.init().unwrap();
    for pin in motors {
        assert!(backend.is_line_exported(pin));
        assert_eq!(backend.line_direction(pin), Some(Direction::Out));
    }
    assert_eq!(values(&backend, &motors), vec![Some(0); 4]);

    vehicle.forward().unwrap();
    assert_eq!(
        values(&backend, &motors),
        vec![Some(1), Some(0), Some(1), Some(0)]
    );

    vehicle.stop().unwrap();
    assert_eq!(values(&backend, &motors), vec![Some(0); 4]);

    vehicle.cleanup();
    for pin in motors {
        assert!(!backend.is_line_exported(pin));
    }
}

#[test]
fn forward_writes_primary_before_secondary() {
    let backend = Arc::new(MockGpioBackend::default());
    let mut vehicle = Vehicle::new(backend.clone(), &bare_layout());
    vehicle.init().unwrap();
    backend.clear_journal();

    vehicle.forward().unwrap();
    assert_eq!(backend.value_writes(), vec![(2, 1), (3, 0), (4, 1), (5, 0)]);
    vehicle.cleanup();
}

#[test]
fn maneuvers_set_motor_states() {
    let backend = Arc::new(MockGpioBackend::default());
    let mut vehicle = Vehicle::new(backend.clone(), &bare_layout());
    vehicle.init().unwrap();

    vehicle.pivot_left().unwrap();
    assert_eq!(
        vehicle.motor_states().unwrap(),
        (MotorState::Backward, MotorState::Forward)
    );
    vehicle.pivot_right().unwrap();
    assert_eq!(
        vehicle.motor_states().unwrap(),
        (MotorState::Forward, MotorState::Backward)
    );
    vehicle.backward().unwrap();
    assert_eq!(
        vehicle.motor_states().unwrap(),
        (MotorState::Backward, MotorState::Backward)
    );
    vehicle.stop().unwrap();
    assert_eq!(
        vehicle.motor_states().unwrap(),
        (MotorState::Stopped, MotorState::Stopped)
    );
    vehicle.cleanup();
}

#[test]
fn indicators_persist_through_stop_until_cleanup() {
    let backend = Arc::new(MockGpioBackend::default());
    let mut vehicle = Vehicle::new(backend.clone(), &lit_layout());
    vehicle.init().unwrap();
    assert_eq!(values(&backend, &[20, 21, 22]), vec![Some(0); 3]);

    vehicle.pivot_left().unwrap();
    vehicle.backward().unwrap();
    vehicle.stop().unwrap();
    assert_eq!(backend.line_value(20), Some(1));
    assert_eq!(backend.line_value(22), Some(1));
    assert_eq!(backend.line_value(21), Some(0));

    vehicle.forward().unwrap();
    assert_eq!(backend.line_value(22), Some(0), "forward clears brake");
    assert_eq!(backend.line_value(20), Some(1), "blinker stays lit");

    vehicle.blinker_left_off().unwrap();
    assert_eq!(backend.line_value(20), Some(0));

    vehicle.pivot_right().unwrap();
    backend.clear_journal();
    vehicle.cleanup();
    let writes = backend.value_writes();
    for light in [20, 21, 22] {
        assert!(writes.contains(&(light, 0)), "light {light} switched off");
        assert!(!backend.is_line_exported(light));
    }
}

#[test]
fn absent_lights_are_never_written() {
    let backend = Arc::new(MockGpioBackend::default());
    let mut vehicle = Vehicle::new(backend.clone(), &bare_layout());
    vehicle.init().unwrap();
    vehicle.brake_on().unwrap();
    vehicle.blinker_left_on().unwrap();
    vehicle.blinker_right_on().unwrap();
    vehicle.cleanup();

    let touched: Vec<u32> = backend.journal().iter().map(|w| w.pin).collect();
    assert!(touched.iter().all(|p| [2, 3, 4, 5].contains(p)));
}

#[test]
fn cleanup_without_init_does_not_fail() {
    let backend = Arc::new(MockGpioBackend::default());
    let mut vehicle = Vehicle::new(backend.clone(), &lit_layout());
    vehicle.cleanup();
    assert!(backend.journal().is_empty());
}

#[test]
fn cleanup_stops_every_motor_after_a_lost_pin() {
    let backend = Arc::new(MockGpioBackend::default());
    let mut vehicle = Vehicle::new(backend.clone(), &bare_layout());
    vehicle.init().unwrap();
    vehicle.forward().unwrap();

    // Someone else released the left primary behind our back.
    backend.unexport(2).unwrap();
    backend.clear_journal();

    vehicle.cleanup();
    let writes = backend.value_writes();
    assert!(writes.contains(&(3, 0)));
    assert!(writes.contains(&(4, 0)));
    assert!(writes.contains(&(5, 0)));
    for pin in [3, 4, 5] {
        assert!(!backend.is_line_exported(pin));
    }
}

#[test]
fn failed_init_is_released_and_not_driven() {
    let backend = Arc::new(MockGpioBackend::default());
    backend.fail_export(4);
    let mut vehicle = Vehicle::new(backend.clone(), &bare_layout());

    assert!(matches!(
        vehicle.init(),
        Err(AppError::ResourceUnavailable(_))
    ));
    assert!(backend.value_writes().is_empty());

    vehicle.cleanup();
    for pin in [2, 3, 4, 5] {
        assert!(!backend.is_line_exported(pin));
    }
}

#[test]
fn dropping_initialized_vehicle_releases_pins() {
    let backend = Arc::new(MockGpioBackend::default());
    {
        let mut vehicle = Vehicle::new(backend.clone(), &lit_layout());
        vehicle.init().unwrap();
        vehicle.forward().unwrap();
    }
    for pin in [2, 3, 4, 5, 20, 21, 22] {
        assert!(!backend.is_line_exported(pin));
    }
    let unexports = backend
        .journal()
        .iter()
        .filter(|w| w.attribute == MockAttribute::Unexport)
        .count();
    assert_eq!(unexports, 7);
}

#[test]
fn init_is_repeatable_after_unclean_exit() {
    let backend = Arc::new(MockGpioBackend::default());
    let mut first = Vehicle::new(backend.clone(), &bare_layout());
    first.init().unwrap();
    // leak the exports as a crashed process would
    std::mem::forget(first);

    let mut second = Vehicle::new(backend.clone(), &bare_layout());
    second.init().unwrap();
    second.forward().unwrap();
    second.cleanup();
}

#[test]
fn button_session_drives_the_cycle() {
    let backend = Arc::new(MockGpioBackend::default());
    let mut button = PinHandle::new(backend.clone(), 18);
    button.setup_input(EdgeDetect::Falling).unwrap();
    backend.script_watch(
        18,
        [
            MockWait::Edge(0),
            MockWait::Timeout,
            MockWait::Edge(0),
            MockWait::Fail,
            MockWait::Edge(0),
            MockWait::Edge(0),
            MockWait::Edge(0),
        ],
    );

    let mut vehicle = Vehicle::new(backend.clone(), &lit_layout());
    vehicle.init().unwrap();

    let config = WatchConfig {
        max_events: 4,
        ..WatchConfig::default()
    };
    let mut watcher = EdgeWatcher::open(&button, &config).unwrap();
    let cancel = AtomicBool::new(false);
    let mut lines = Vec::new();
    let report = drive_vehicle(&vehicle, &mut watcher, &cancel, |s| lines.push(s.clone()))
        .unwrap();

    assert_eq!(report.events, 4);
    assert_eq!(report.timeouts, 1);
    assert_eq!(report.wait_errors, 1);
    assert!(!watcher.is_open());

    let moves: Vec<Action> = lines
        .iter()
        .filter_map(|s| match s {
            Status::Move(a) => Some(*a),
            _ => None,
        })
        .collect();
    assert_eq!(
        moves,
        vec![
            Action::Forward,
            Action::PivotLeft,
            Action::PivotRight,
            Action::Backward
        ]
    );
    assert_eq!(
        vehicle.motor_states().unwrap(),
        (MotorState::Backward, MotorState::Backward)
    );
    assert_eq!(backend.line_value(22), Some(1));

    vehicle.cleanup();
    button.unexport();
    assert!(!backend.is_line_exported(18));
}

#[test]
fn cancelled_session_runs_no_moves() {
    let backend = Arc::new(MockGpioBackend::default());
    let mut button = PinHandle::new(backend.clone(), 18);
    button.setup_input(EdgeDetect::Falling).unwrap();
    backend.script_watch(18, [MockWait::Edge(0)]);

    let mut vehicle = Vehicle::new(backend.clone(), &bare_layout());
    vehicle.init().unwrap();
    backend.clear_journal();

    let mut watcher = EdgeWatcher::open(&button, &WatchConfig::default()).unwrap();
    let cancel = AtomicBool::new(true);
    let mut lines = Vec::new();
    let report = drive_vehicle(&vehicle, &mut watcher, &cancel, |s| lines.push(s.clone()))
        .unwrap();

    assert!(report.cancelled);
    assert_eq!(lines, vec![Status::Cancelled]);
    assert!(backend.value_writes().is_empty());
    vehicle.cleanup();
}

#[test]
fn persistent_wait_failures_abort_session() {
    let backend = Arc::new(MockGpioBackend::default());
    let mut button = PinHandle::new(backend.clone(), 18);
    button.setup_input(EdgeDetect::Falling).unwrap();
    backend.script_watch(18, [MockWait::Fail; 3]);

    let mut vehicle = Vehicle::new(backend.clone(), &bare_layout());
    vehicle.init().unwrap();

    let config = WatchConfig {
        max_consecutive_failures: 3,
        ..WatchConfig::default()
    };
    let mut watcher = EdgeWatcher::open(&button, &config).unwrap();
    let cancel = AtomicBool::new(false);
    let result = drive_vehicle(&vehicle, &mut watcher, &cancel, |_| {});

    assert!(matches!(result, Err(AppError::WaitFailure(_))));
    assert!(!watcher.is_open());
    vehicle.cleanup();
}

#[test]
fn watching_an_output_is_rejected() {
    let backend = Arc::new(MockGpioBackend::default());
    let mut pin = PinHandle::new(backend.clone(), 18);
    pin.setup_output().unwrap();
    assert!(matches!(
        EdgeWatcher::open(&pin, &WatchConfig::default()),
        Err(AppError::InvalidState(_))
    ));
}
