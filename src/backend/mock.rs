use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use rustc_hash::{FxHashMap, FxHashSet};

use crate::config::{Direction, EdgeDetect};
use crate::error::AppError;
use crate::gpio::{EdgeSource, GpioBackend, Readiness};

/// In-memory stand-in for the kernel's export table and attribute files.
///
/// Mirrors the kernel's refusals (double export, unexport of an unknown pin,
/// attribute access before export, writes to inputs) and journals every
/// accepted write.
#[derive(Default)]
pub struct MockGpioBackend {
    lines: Mutex<FxHashMap<u32, MockLine>>, // keyed by pin, present while exported
    journal: Mutex<Vec<MockWrite>>,
    failing_exports: Mutex<FxHashSet<u32>>,
    watch_scripts: Mutex<FxHashMap<u32, VecDeque<MockWait>>>,
    watch_ops: Arc<Mutex<Vec<WatchOp>>>,
}

#[derive(Clone)]
struct MockLine {
    direction: Direction,
    edge: EdgeDetect,
    value: u8,
}

impl Default for MockLine {
    fn default() -> Self {
        Self {
            direction: Direction::In,
            edge: EdgeDetect::None,
            value: 0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MockAttribute {
    Export,
    Unexport,
    Direction,
    Edge,
    Value,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MockWrite {
    pub pin: u32,
    pub attribute: MockAttribute,
    pub data: String,
}

impl MockGpioBackend {
    pub fn is_line_exported(&self, pin: u32) -> bool {
        self.lines.lock().contains_key(&pin)
    }

    pub fn line_direction(&self, pin: u32) -> Option<Direction> {
        self.lines.lock().get(&pin).map(|l| l.direction)
    }

    pub fn line_edge(&self, pin: u32) -> Option<EdgeDetect> {
        self.lines.lock().get(&pin).map(|l| l.edge)
    }

    pub fn line_value(&self, pin: u32) -> Option<u8> {
        self.lines.lock().get(&pin).map(|l| l.value)
    }

    /// Drives an exported input to the given level, as external hardware would.
    pub fn set_input_level(&self, pin: u32, value: u8) -> Result<(), AppError> {
        let mut lines = self.lines.lock();
        let line = lines.get_mut(&pin).ok_or_else(|| not_exported(pin))?;
        line.value = value;
        Ok(())
    }

    /// Makes every later export of `pin` fail as if another owner held it.
    pub fn fail_export(&self, pin: u32) {
        self.failing_exports.lock().insert(pin);
    }

    /// Queues the wait results the next watch descriptor on `pin` will replay.
    pub fn script_watch(&self, pin: u32, script: impl IntoIterator<Item = MockWait>) {
        self.watch_scripts
            .lock()
            .insert(pin, script.into_iter().collect());
    }

    pub fn journal(&self) -> Vec<MockWrite> {
        self.journal.lock().clone()
    }

    pub fn clear_journal(&self) {
        self.journal.lock().clear();
    }

    /// Value writes in issue order, as `(pin, value)` pairs.
    pub fn value_writes(&self) -> Vec<(u32, u8)> {
        self.journal
            .lock()
            .iter()
            .filter(|w| w.attribute == MockAttribute::Value)
            .map(|w| (w.pin, if w.data == "1" { 1 } else { 0 }))
            .collect()
    }

    pub fn watch_ops(&self) -> Vec<WatchOp> {
        self.watch_ops.lock().clone()
    }

    fn record(&self, pin: u32, attribute: MockAttribute, data: &str) {
        self.journal.lock().push(MockWrite {
            pin,
            attribute,
            data: data.to_string(),
        });
    }
}

fn not_exported(pin: u32) -> AppError {
    AppError::ResourceUnavailable(format!("gpio{pin} attribute not present"))
}

impl GpioBackend for MockGpioBackend {
    type Watch = MockEdgeSource;

    fn export(&self, pin: u32) -> Result<(), AppError> {
        if self.failing_exports.lock().contains(&pin) {
            return Err(AppError::ResourceUnavailable(format!(
                "export {pin}: device busy"
            )));
        }
        let mut lines = self.lines.lock();
        if lines.contains_key(&pin) {
            return Err(AppError::ResourceUnavailable(format!(
                "export {pin}: device busy"
            )));
        }
        lines.insert(pin, MockLine::default());
        drop(lines);
        self.record(pin, MockAttribute::Export, &pin.to_string());
        Ok(())
    }

    fn unexport(&self, pin: u32) -> Result<(), AppError> {
        if self.lines.lock().remove(&pin).is_none() {
            return Err(AppError::IoFailure(format!(
                "unexport {pin}: invalid argument"
            )));
        }
        self.record(pin, MockAttribute::Unexport, &pin.to_string());
        Ok(())
    }

    fn is_exported(&self, pin: u32) -> bool {
        self.is_line_exported(pin)
    }

    fn set_direction(&self, pin: u32, direction: Direction) -> Result<(), AppError> {
        let mut lines = self.lines.lock();
        let line = lines.get_mut(&pin).ok_or_else(|| not_exported(pin))?;
        line.direction = direction;
        if direction == Direction::Out {
            // "out" starts the line low
            line.value = 0;
            line.edge = EdgeDetect::None;
        }
        drop(lines);
        self.record(pin, MockAttribute::Direction, direction.as_sysfs_str());
        Ok(())
    }

    fn set_edge(&self, pin: u32, edge: EdgeDetect) -> Result<(), AppError> {
        let mut lines = self.lines.lock();
        let line = lines.get_mut(&pin).ok_or_else(|| not_exported(pin))?;
        if line.direction != Direction::In && edge != EdgeDetect::None {
            return Err(AppError::IoFailure(format!(
                "edge on gpio{pin}: input/output error"
            )));
        }
        line.edge = edge;
        drop(lines);
        self.record(pin, MockAttribute::Edge, edge.as_sysfs_str());
        Ok(())
    }

    fn read_value(&self, pin: u32) -> Result<u8, AppError> {
        self.line_value(pin).ok_or_else(|| not_exported(pin))
    }

    fn write_value(&self, pin: u32, value: u8) -> Result<(), AppError> {
        if value > 1 {
            return Err(AppError::InvalidValue("Value must be 0 or 1".into()));
        }
        let mut lines = self.lines.lock();
        let line = lines.get_mut(&pin).ok_or_else(|| not_exported(pin))?;
        if line.direction != Direction::Out {
            return Err(AppError::IoFailure(format!(
                "value on gpio{pin}: operation not permitted"
            )));
        }
        line.value = value;
        drop(lines);
        self.record(pin, MockAttribute::Value, &value.to_string());
        Ok(())
    }

    fn open_value_for_watch(&self, pin: u32) -> Result<MockEdgeSource, AppError> {
        if !self.is_line_exported(pin) {
            return Err(not_exported(pin));
        }
        let script = self.watch_scripts.lock().remove(&pin).unwrap_or_default();
        Ok(MockEdgeSource::with_journal(script, self.watch_ops.clone()))
    }
}

/// One scripted outcome of [`EdgeSource::wait`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MockWait {
    Timeout,
    /// A transition; the value attribute now reads `level`.
    Edge(u8),
    /// Readiness without the priority flag.
    Spurious,
    Fail,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchOp {
    Wait,
    Rewind,
    Read { offset: usize, bytes: usize },
    Close,
}

/// Scripted watch descriptor. Reads honour the file offset the way sysfs
/// does: nothing is returned until the caller rewinds.
pub struct MockEdgeSource {
    script: VecDeque<MockWait>,
    content: Vec<u8>,
    offset: usize,
    ops: Arc<Mutex<Vec<WatchOp>>>,
}

impl MockEdgeSource {
    pub fn new(script: impl IntoIterator<Item = MockWait>) -> Self {
        Self::with_journal(script.into_iter().collect(), Arc::default())
    }

    fn with_journal(script: VecDeque<MockWait>, ops: Arc<Mutex<Vec<WatchOp>>>) -> Self {
        Self {
            script,
            content: b"0\n".to_vec(),
            // opening and never reading leaves a pending value at offset 0
            offset: 0,
            ops,
        }
    }

    /// Shared handle on the operation journal; stays readable after the
    /// source is closed.
    pub fn ops_handle(&self) -> Arc<Mutex<Vec<WatchOp>>> {
        self.ops.clone()
    }
}

impl EdgeSource for MockEdgeSource {
    fn wait(&mut self, _timeout: Duration) -> Result<Readiness, AppError> {
        self.ops.lock().push(WatchOp::Wait);
        match self.script.pop_front().unwrap_or(MockWait::Timeout) {
            MockWait::Timeout => Ok(Readiness::TimedOut),
            MockWait::Edge(level) => {
                self.content = format!("{level}\n").into_bytes();
                Ok(Readiness::Priority)
            }
            MockWait::Spurious => Ok(Readiness::Other),
            MockWait::Fail => Err(AppError::WaitFailure("poll: interrupted".into())),
        }
    }

    fn rewind(&mut self) -> Result<(), AppError> {
        self.ops.lock().push(WatchOp::Rewind);
        self.offset = 0;
        Ok(())
    }

    fn read_pending(&mut self, buf: &mut [u8]) -> Result<usize, AppError> {
        let start = self.offset.min(self.content.len());
        let n = (self.content.len() - start).min(buf.len());
        buf[..n].copy_from_slice(&self.content[start..start + n]);
        self.ops.lock().push(WatchOp::Read {
            offset: start,
            bytes: n,
        });
        self.offset = start + n;
        Ok(n)
    }
}

impl Drop for MockEdgeSource {
    fn drop(&mut self) {
        self.ops.lock().push(WatchOp::Close);
    }
}
