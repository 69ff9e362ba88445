// redactgate-http/src/scrub.rs
//! Log scrubbing: every emitted log line passes through the detector so a
//! secret that reaches a log call never reaches the log output.
//!
//! The scrubber is an explicitly constructed and installed `log::Log`
//! wrapper around an inner logger, not a process-global patch: build it,
//! then hand it to [`install`] (or to `log::set_boxed_logger` yourself in
//! tests).

use log::{Log, Metadata, Record, SetLoggerError};

use redactgate_core::ContextSensitivity;

use crate::stream::DetectorFn;

/// Wraps an inner logger, scrubbing each record's message before
/// forwarding.
pub struct ScrubbingLogger {
    inner: Box<dyn Log>,
    detector: DetectorFn,
    tier: ContextSensitivity,
}

impl ScrubbingLogger {
    /// Scrubs at `tier`; logs are internal surface, so `Secrets` (redact
    /// everything found) is the usual choice.
    pub fn new(inner: Box<dyn Log>, detector: DetectorFn, tier: ContextSensitivity) -> Self {
        Self { inner, detector, tier }
    }

    fn scrub(&self, message: &str) -> String {
        match (self.detector)(message, self.tier) {
            Ok(scrubbed) => scrubbed,
            // If the detector is down we cannot prove the line is clean;
            // withhold it rather than risk leaking.
            Err(_) => "[log message withheld: redaction unavailable]".to_string(),
        }
    }
}

impl Log for ScrubbingLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        self.inner.enabled(metadata)
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }
        let scrubbed = self.scrub(&record.args().to_string());
        self.inner.log(
            &Record::builder()
                .args(format_args!("{}", scrubbed))
                .metadata(record.metadata().clone())
                .module_path(record.module_path())
                .file(record.file())
                .line(record.line())
                .build(),
        );
    }

    fn flush(&self) {
        self.inner.flush();
    }
}

/// Installs the scrubber as the process logger. Call once at startup,
/// after configuration is loaded.
pub fn install(logger: ScrubbingLogger, max_level: log::LevelFilter) -> Result<(), SetLoggerError> {
    log::set_boxed_logger(Box::new(logger))?;
    log::set_max_level(max_level);
    Ok(())
}
