use crate::qemu_trace;
use log::{LevelFilter, Log, Metadata, Record, SetLoggerError};

/// `log` backend writing `"[LEVEL] target: message"` lines to the debug port.
pub struct QemuLogger {
    max_level: LevelFilter,
}

impl QemuLogger {
    #[must_use]
    pub const fn new(max_level: LevelFilter) -> Self {
        Self { max_level }
    }

    #[must_use]
    pub const fn max_level(&self) -> LevelFilter {
        self.max_level
    }

    /// Install the logger. Call this once during early init, before any
    /// other thread exists.
    ///
    /// # Errors
    /// If a logger was already installed.
    pub fn init(self) -> Result<(), SetLoggerError> {
        static mut LOGGER: QemuLogger = QemuLogger::new(LevelFilter::Off);

        let max_level = self.max_level;
        // SAFETY: single-threaded early boot; the static is written once,
        // before `log` hands out the shared reference.
        unsafe {
            LOGGER = self;
            log::set_logger(&*(&raw const LOGGER))?;
        }
        log::set_max_level(max_level);
        Ok(())
    }
}

impl Log for QemuLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= self.max_level
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }

        qemu_trace!(
            "[{}] {}: {}\n",
            record.level(),
            record.target(),
            record.args()
        );
    }

    fn flush(&self) {
        // no-op for qemu debug port
    }
}
