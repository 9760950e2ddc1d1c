//! GPIO line access through the sysfs interface.
//!
//! The sensing and trigger logic only sees the [`GpioLine`] trait; the
//! sysfs driver below is one implementation of it. Lines are reserved by
//! exporting the pin and released by unexporting it, and a release always
//! runs on drop so a partially initialized setup cleans up after itself.

use std::fs::{File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::os::unix::io::AsRawFd;
use std::time::Duration;
use std::{fs, path::PathBuf};

use log::warn;
use thiserror::Error;

const GPIO_ROOT: &str = "/sys/class/gpio";

#[derive(Debug, Error)]
pub enum GpioError {
    #[error("failed to export gpio {pin}: {source}")]
    Export { pin: u32, source: io::Error },
    #[error("failed to open gpio {pin} value: {source}")]
    Open { pin: u32, source: io::Error },
    #[error("failed to write gpio {pin} {attribute}: {source}")]
    Write {
        pin: u32,
        attribute: &'static str,
        source: io::Error,
    },
    #[error("failed to read gpio {pin} value: {source}")]
    Read { pin: u32, source: io::Error },
    #[error("poll on gpio {pin} value failed: {source}")]
    Poll { pin: u32, source: io::Error },
    #[error("gpio {pin} has been released")]
    Released { pin: u32 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    In,
    Out,
}

impl Direction {
    fn as_str(self) -> &'static str {
        match self {
            Direction::In => "in",
            Direction::Out => "out",
        }
    }
}

/// Interrupt trigger condition of a line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Edge {
    None,
    Rising,
    Falling,
    Both,
}

impl Edge {
    fn as_str(self) -> &'static str {
        match self {
            Edge::None => "none",
            Edge::Rising => "rising",
            Edge::Falling => "falling",
            Edge::Both => "both",
        }
    }
}

/// Outcome of a bounded edge wait.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitResult {
    /// The armed edge fired.
    Edge,
    /// The timeout elapsed without an edge.
    Timeout,
}

/// The line operations the sensing core needs from a GPIO driver.
pub trait GpioLine {
    fn set_direction(&mut self, direction: Direction) -> Result<(), GpioError>;
    fn set_edge(&mut self, edge: Edge) -> Result<(), GpioError>;
    fn set_active_low(&mut self, active_low: bool) -> Result<(), GpioError>;
    fn read(&mut self) -> Result<bool, GpioError>;
    fn write(&mut self, level: bool) -> Result<(), GpioError>;

    /// Block until the armed edge fires or `timeout` elapses.
    ///
    /// `None` blocks indefinitely.
    fn wait_for_edge(&mut self, timeout: Option<Duration>) -> Result<WaitResult, GpioError>;

    /// Release the line reservation. Calling this twice is a no-op.
    fn release(&mut self);
}

/// A GPIO line driven through `/sys/class/gpio`.
///
/// The value file descriptor is kept open for the lifetime of the
/// reservation; direction, edge and active_low go through their attribute
/// files per write.
pub struct SysfsLine {
    pin: u32,
    value: Option<File>,
}

impl SysfsLine {
    /// Reserve the pin and open its value file.
    pub fn open(pin: u32) -> Result<Self, GpioError> {
        export(pin)?;
        let value = OpenOptions::new()
            .read(true)
            .write(true)
            .open(attribute_path(pin, "value"))
            .map_err(|source| GpioError::Open { pin, source })?;
        Ok(Self {
            pin,
            value: Some(value),
        })
    }

    pub fn pin(&self) -> u32 {
        self.pin
    }

    fn value(&mut self) -> Result<&mut File, GpioError> {
        let pin = self.pin;
        self.value.as_mut().ok_or(GpioError::Released { pin })
    }

    fn write_attribute(&self, attribute: &'static str, contents: &str) -> Result<(), GpioError> {
        fs::write(attribute_path(self.pin, attribute), contents).map_err(|source| {
            GpioError::Write {
                pin: self.pin,
                attribute,
                source,
            }
        })
    }

    /// Consume a pending interrupt on the value file.
    fn consume(pin: u32, file: &mut File) -> Result<(), GpioError> {
        let inner = |file: &mut File| -> io::Result<()> {
            file.seek(SeekFrom::Start(0))?;
            let mut buf = [0u8; 3];
            file.read(&mut buf)?;
            Ok(())
        };
        inner(file).map_err(|source| GpioError::Read { pin, source })
    }
}

impl GpioLine for SysfsLine {
    fn set_direction(&mut self, direction: Direction) -> Result<(), GpioError> {
        self.value()?;
        self.write_attribute("direction", direction.as_str())
    }

    fn set_edge(&mut self, edge: Edge) -> Result<(), GpioError> {
        self.value()?;
        self.write_attribute("edge", edge.as_str())
    }

    fn set_active_low(&mut self, active_low: bool) -> Result<(), GpioError> {
        self.value()?;
        self.write_attribute("active_low", if active_low { "1" } else { "0" })
    }

    fn read(&mut self) -> Result<bool, GpioError> {
        let pin = self.pin;
        let file = self.value()?;
        let inner = |file: &mut File| -> io::Result<bool> {
            file.seek(SeekFrom::Start(0))?;
            let mut buf = [0u8; 3];
            let n = file.read(&mut buf)?;
            Ok(buf[..n].starts_with(b"1"))
        };
        inner(file).map_err(|source| GpioError::Read { pin, source })
    }

    fn write(&mut self, level: bool) -> Result<(), GpioError> {
        let pin = self.pin;
        let file = self.value()?;
        file.write_all(if level { b"1\n" } else { b"0\n" })
            .map_err(|source| GpioError::Write {
                pin,
                attribute: "value",
                source,
            })
    }

    fn wait_for_edge(&mut self, timeout: Option<Duration>) -> Result<WaitResult, GpioError> {
        let pin = self.pin;
        let file = self.value()?;

        // A stale interrupt would make poll return immediately.
        Self::consume(pin, file)?;

        let timeout_ms: libc::c_int = match timeout {
            Some(t) => t.as_millis().min(i32::MAX as u128) as libc::c_int,
            None => -1,
        };
        let mut pfd = libc::pollfd {
            fd: file.as_raw_fd(),
            events: libc::POLLPRI,
            revents: 0,
        };
        // SAFETY: pfd is a single initialized pollfd whose fd stays open
        // for the duration of the call.
        let ret = unsafe { libc::poll(&mut pfd, 1, timeout_ms) };
        let result = if ret > 0 {
            WaitResult::Edge
        } else if ret == 0 {
            WaitResult::Timeout
        } else {
            let source = io::Error::last_os_error();
            if source.kind() == io::ErrorKind::Interrupted {
                // A termination signal lands here; report no edge so the
                // caller gets back to its shutdown check.
                WaitResult::Timeout
            } else {
                return Err(GpioError::Poll { pin, source });
            }
        };

        Self::consume(pin, file)?;
        Ok(result)
    }

    fn release(&mut self) {
        if self.value.take().is_some() {
            if let Err(e) = fs::write(format!("{GPIO_ROOT}/unexport"), self.pin.to_string()) {
                warn!("failed to unexport gpio {}: {}", self.pin, e);
            }
        }
    }
}

impl Drop for SysfsLine {
    fn drop(&mut self) {
        self.release();
    }
}

fn attribute_path(pin: u32, attribute: &str) -> PathBuf {
    PathBuf::from(format!("{GPIO_ROOT}/gpio{pin}/{attribute}"))
}

fn export(pin: u32) -> Result<(), GpioError> {
    match fs::write(format!("{GPIO_ROOT}/export"), pin.to_string()) {
        Ok(()) => Ok(()),
        // EBUSY means the pin was already exported, e.g. after an unclean
        // shutdown. The reservation is still usable.
        Err(e) if e.raw_os_error() == Some(libc::EBUSY) => Ok(()),
        Err(source) => Err(GpioError::Export { pin, source }),
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_attribute_strings() {
        assert_eq!(Direction::In.as_str(), "in");
        assert_eq!(Direction::Out.as_str(), "out");
        assert_eq!(Edge::None.as_str(), "none");
        assert_eq!(Edge::Rising.as_str(), "rising");
        assert_eq!(Edge::Falling.as_str(), "falling");
        assert_eq!(Edge::Both.as_str(), "both");
    }

    #[test]
    fn test_attribute_path() {
        assert_eq!(
            attribute_path(17, "edge"),
            PathBuf::from("/sys/class/gpio/gpio17/edge")
        );
    }
}
