// SPDX-FileCopyrightText: 2023 Rivos Inc.
//
// SPDX-License-Identifier: Apache-2.0

use core::fmt::{self, Write};

use log::{LevelFilter, Log, Metadata, Record, SetLoggerError};
use sync::Mutex;

/// Interface for a console driver.
pub trait ConsoleDriver: Sync {
    /// Writes `bytes` to the console.
    fn write_bytes(&self, bytes: &[u8]);
}

/// Represents the system console, used as the sink for log records.
pub struct Console {
    driver: Option<&'static dyn ConsoleDriver>,
}

impl Console {
    const fn new() -> Self {
        Self { driver: None }
    }

    /// Sets the driver for the system console.
    pub fn set_driver(driver: &'static dyn ConsoleDriver) {
        CONSOLE.lock().driver = Some(driver);
    }
}

/// The `Console` singleton.
pub static CONSOLE: Mutex<Console> = Mutex::new(Console::new());

impl Write for Console {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        if let Some(w) = self.driver {
            w.write_bytes(s.as_bytes());
        }
        Ok(())
    }
}

struct ConsoleLogger;

static LOGGER: ConsoleLogger = ConsoleLogger;

impl Log for ConsoleLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= log::max_level()
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }
        let _ = writeln!(
            CONSOLE.lock(),
            "[pkvm] {} {}: {}",
            record.level(),
            record.target(),
            record.args()
        );
    }

    fn flush(&self) {}
}

/// Directs log records up to `level` to `driver`. Fails if a logger was already installed.
pub fn init(driver: &'static dyn ConsoleDriver, level: LevelFilter) -> Result<(), SetLoggerError> {
    Console::set_driver(driver);
    log::set_logger(&LOGGER)?;
    log::set_max_level(level);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::string::String;
    use std::vec::Vec;

    struct CaptureDriver(Mutex<Vec<u8>>);

    impl ConsoleDriver for CaptureDriver {
        fn write_bytes(&self, bytes: &[u8]) {
            self.0.lock().extend_from_slice(bytes);
        }
    }

    static CAPTURE: CaptureDriver = CaptureDriver(Mutex::new(Vec::new()));

    #[test]
    fn log_to_console() {
        init(&CAPTURE, LevelFilter::Debug).unwrap();
        log::warn!("page {:#x} busy", 0x1000);
        log::trace!("not shown");
        let out = String::from_utf8(CAPTURE.0.lock().clone()).unwrap();
        assert!(out.contains("[pkvm] WARN pkvm::console::tests: page 0x1000 busy\n"));
        assert!(!out.contains("not shown"));
        assert!(init(&CAPTURE, LevelFilter::Debug).is_err());
    }
}
