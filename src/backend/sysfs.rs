use log::debug;
use std::fs::{File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::os::fd::AsFd;
use std::os::unix::fs::OpenOptionsExt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use nix::poll::{PollFd, PollFlags, PollTimeout, poll};

use crate::config::{Direction, EdgeDetect, SysfsConfig};
use crate::error::AppError;
use crate::gpio::{EdgeSource, GpioBackend, Readiness, parse_level};

const SYSFS_EXPORT: &str = "export";
const SYSFS_UNEXPORT: &str = "unexport";
const SYSFS_DIRECTION: &str = "direction";
const SYSFS_EDGE: &str = "edge";
const SYSFS_VALUE: &str = "value";

/// Legacy `/sys/class/gpio` attribute-file backend.
///
/// Every call is an independent open/write/close; no descriptor is cached
/// except the ones handed out by [`GpioBackend::open_value_for_watch`].
pub struct SysfsBackend {
    root: PathBuf,
    pin_base: u32,
}

impl SysfsBackend {
    pub fn new(config: &SysfsConfig) -> Result<Self, AppError> {
        if !config.root.is_dir() {
            return Err(AppError::ResourceUnavailable(format!(
                "gpio sysfs root {} not found",
                config.root.display()
            )));
        }
        Ok(Self {
            root: config.root.clone(),
            pin_base: config.pin_base,
        })
    }

    /// Kernel pin number for a logical pin.
    pub fn line(&self, pin: u32) -> Result<u32, AppError> {
        self.pin_base.checked_add(pin).ok_or_else(|| {
            AppError::InvalidValue(format!("pin {pin} overflows base {}", self.pin_base))
        })
    }

    fn attribute(&self, pin: u32, name: &str) -> Result<PathBuf, AppError> {
        Ok(self.root.join(format!("gpio{}", self.line(pin)?)).join(name))
    }

    fn write_attribute(path: &Path, data: &str) -> Result<(), AppError> {
        let mut file = OpenOptions::new()
            .write(true)
            .truncate(true)
            .open(path)
            .map_err(|e| {
                AppError::ResourceUnavailable(format!("open {}: {e}", path.display()))
            })?;
        write_checked(&mut file, data, path)?;
        debug!("{} <- {data}", path.display());
        Ok(())
    }
}

/// One `write(2)` of the whole attribute string. Sysfs attributes are parsed
/// per write call, so a partial write is a failure, not something to resume.
fn write_checked<W: Write>(writer: &mut W, data: &str, path: &Path) -> Result<(), AppError> {
    let written = writer
        .write(data.as_bytes())
        .map_err(|e| write_error(path, e))?;
    if written != data.len() {
        return Err(AppError::IoFailure(format!(
            "short write to {}: {written} of {} bytes",
            path.display(),
            data.len()
        )));
    }
    Ok(())
}

fn write_error(path: &Path, e: io::Error) -> AppError {
    match e.raw_os_error() {
        Some(libc::EBUSY) => {
            AppError::ResourceUnavailable(format!("write {}: pin busy: {e}", path.display()))
        }
        _ => AppError::IoFailure(format!("write {}: {e}", path.display())),
    }
}

impl GpioBackend for SysfsBackend {
    type Watch = SysfsValueWatch;

    fn export(&self, pin: u32) -> Result<(), AppError> {
        let line = self.line(pin)?;
        Self::write_attribute(&self.root.join(SYSFS_EXPORT), &line.to_string())
    }

    fn unexport(&self, pin: u32) -> Result<(), AppError> {
        let line = self.line(pin)?;
        Self::write_attribute(&self.root.join(SYSFS_UNEXPORT), &line.to_string())
    }

    fn is_exported(&self, pin: u32) -> bool {
        self.line(pin)
            .map(|line| self.root.join(format!("gpio{line}")).is_dir())
            .unwrap_or(false)
    }

    fn set_direction(&self, pin: u32, direction: Direction) -> Result<(), AppError> {
        Self::write_attribute(
            &self.attribute(pin, SYSFS_DIRECTION)?,
            direction.as_sysfs_str(),
        )
    }

    fn set_edge(&self, pin: u32, edge: EdgeDetect) -> Result<(), AppError> {
        Self::write_attribute(&self.attribute(pin, SYSFS_EDGE)?, edge.as_sysfs_str())
    }

    fn read_value(&self, pin: u32) -> Result<u8, AppError> {
        let path = self.attribute(pin, SYSFS_VALUE)?;
        let mut file = File::open(&path).map_err(|e| {
            AppError::ResourceUnavailable(format!("open {}: {e}", path.display()))
        })?;
        let mut buf = [0u8; 8];
        let n = file
            .read(&mut buf)
            .map_err(|e| AppError::IoFailure(format!("read {}: {e}", path.display())))?;
        parse_level(&buf[..n])
    }

    fn write_value(&self, pin: u32, value: u8) -> Result<(), AppError> {
        let data = match value {
            0 => "0",
            1 => "1",
            _ => return Err(AppError::InvalidValue("Value must be 0 or 1".into())),
        };
        Self::write_attribute(&self.attribute(pin, SYSFS_VALUE)?, data)
    }

    fn open_value_for_watch(&self, pin: u32) -> Result<SysfsValueWatch, AppError> {
        let path = self.attribute(pin, SYSFS_VALUE)?;
        let file = OpenOptions::new()
            .read(true)
            .custom_flags(libc::O_NONBLOCK)
            .open(&path)
            .map_err(|e| {
                AppError::ResourceUnavailable(format!("open {}: {e}", path.display()))
            })?;
        Ok(SysfsValueWatch { file, path })
    }
}

/// Maps the returned events of a ready descriptor. POLLPRI wins even when
/// POLLERR accompanies it, which is how sysfs reports a value change.
fn classify(revents: PollFlags) -> Result<Readiness, String> {
    if revents.contains(PollFlags::POLLPRI) {
        Ok(Readiness::Priority)
    } else if revents.intersects(PollFlags::POLLERR | PollFlags::POLLNVAL) {
        Err(format!("descriptor error ({revents:?})"))
    } else {
        Ok(Readiness::Other)
    }
}

/// Read-only, non-blocking descriptor on one value attribute.
pub struct SysfsValueWatch {
    file: File,
    path: PathBuf,
}

impl SysfsValueWatch {
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl EdgeSource for SysfsValueWatch {
    fn wait(&mut self, timeout: Duration) -> Result<Readiness, AppError> {
        // sysfs signals value changes as POLLPRI (plus POLLERR), never POLLIN
        let mut fds = [PollFd::new(self.file.as_fd(), PollFlags::POLLPRI)];
        let poll_timeout = i32::try_from(timeout.as_millis())
            .ok()
            .and_then(|ms| PollTimeout::try_from(ms).ok())
            .ok_or_else(|| {
                AppError::WaitFailure(format!(
                    "poll {}: timeout {timeout:?} out of range",
                    self.path.display()
                ))
            })?;

        match poll(&mut fds, poll_timeout) {
            Ok(0) => Ok(Readiness::TimedOut),
            Ok(_) => classify(fds[0].revents().unwrap_or(PollFlags::empty())).map_err(|e| {
                AppError::WaitFailure(format!("poll {}: {e}", self.path.display()))
            }),
            Err(e) => Err(AppError::WaitFailure(format!(
                "poll {}: {e}",
                self.path.display()
            ))),
        }
    }

    fn rewind(&mut self) -> Result<(), AppError> {
        self.file
            .seek(SeekFrom::Start(0))
            .map(|_| ())
            .map_err(|e| AppError::IoFailure(format!("seek {}: {e}", self.path.display())))
    }

    fn read_pending(&mut self, buf: &mut [u8]) -> Result<usize, AppError> {
        self.file
            .read(buf)
            .map_err(|e| AppError::IoFailure(format!("read {}: {e}", self.path.display())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Accepts at most `limit` bytes per write.
    struct ShortWriter {
        limit: usize,
        data: Vec<u8>,
    }

    impl Write for ShortWriter {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            let n = buf.len().min(self.limit);
            self.data.extend_from_slice(&buf[..n]);
            Ok(n)
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn partial_write_is_io_failure() {
        let path = Path::new("/sys/class/gpio/export");
        let mut writer = ShortWriter {
            limit: 2,
            data: Vec::new(),
        };
        let err = write_checked(&mut writer, "529", path).unwrap_err();
        assert!(matches!(err, AppError::IoFailure(_)));
        assert_eq!(writer.data, b"52");

        let mut writer = ShortWriter {
            limit: 8,
            data: Vec::new(),
        };
        write_checked(&mut writer, "529", path).unwrap();
        assert_eq!(writer.data, b"529");
    }

    #[test]
    fn busy_pin_is_unavailable() {
        let err = write_error(Path::new("export"), io::Error::from_raw_os_error(libc::EBUSY));
        assert!(matches!(err, AppError::ResourceUnavailable(_)));
        let err = write_error(Path::new("export"), io::Error::from_raw_os_error(libc::EINVAL));
        assert!(matches!(err, AppError::IoFailure(_)));
    }

    #[test]
    fn priority_wins_over_error_flags() {
        assert_eq!(classify(PollFlags::POLLPRI), Ok(Readiness::Priority));
        assert_eq!(
            classify(PollFlags::POLLPRI | PollFlags::POLLERR),
            Ok(Readiness::Priority)
        );
    }

    #[test]
    fn error_flags_alone_fail_the_wait() {
        assert!(classify(PollFlags::POLLERR).is_err());
        assert!(classify(PollFlags::POLLNVAL).is_err());
        assert!(classify(PollFlags::POLLERR | PollFlags::POLLHUP).is_err());
    }

    #[test]
    fn other_events_are_not_edges() {
        assert_eq!(classify(PollFlags::POLLHUP), Ok(Readiness::Other));
        assert_eq!(classify(PollFlags::empty()), Ok(Readiness::Other));
    }
}
