//! Logging setup: indicatif-aware on a terminal, plain `[LEVEL]` lines otherwise

use indicatif::MultiProgress;

/// HTML parser internals are chatty at debug level
const QUIET_DEPS: &[&str] = &["html5ever", "selectors", "hyper_util", "reqwest"];

fn level_style(level: log::Level, color: bool) -> (&'static str, &'static str, &'static str) {
    let label = match level {
        log::Level::Error => "ERROR",
        log::Level::Warn => "WARN ",
        log::Level::Info => "INFO ",
        log::Level::Debug => "DEBUG",
        log::Level::Trace => "TRACE",
    };
    if !color {
        return ("", label, "");
    }
    let ansi = match level {
        log::Level::Error => "\x1b[31m",
        log::Level::Warn => "\x1b[33m",
        log::Level::Info => "\x1b[32m",
        log::Level::Debug => "\x1b[36m",
        log::Level::Trace => "\x1b[35m",
    };
    (ansi, label, "\x1b[0m")
}

/// Logger that prints above the progress spinners instead of through them.
pub struct IndicatifLogger {
    inner: env_logger::Logger,
    multi: MultiProgress,
}

impl IndicatifLogger {
    pub fn new(inner: env_logger::Logger, multi: MultiProgress) -> Self {
        Self { inner, multi }
    }
}

impl log::Log for IndicatifLogger {
    fn enabled(&self, metadata: &log::Metadata) -> bool {
        self.inner.enabled(metadata)
    }

    fn log(&self, record: &log::Record) {
        if self.inner.enabled(record.metadata()) {
            let (pre, label, post) = level_style(record.level(), true);
            let line = format!("[{pre}{label}{post}] {}", record.args());
            self.multi.suspend(|| eprintln!("{line}"));
        }
    }

    fn flush(&self) {
        self.inner.flush();
    }
}

/// Filter string: `RUST_LOG`-style default with noisy dependencies capped at warn.
fn default_filter(debug: bool, tty: bool) -> String {
    let level = if debug {
        "debug"
    } else if tty {
        "warn"
    } else {
        "info"
    };
    let mut filter = level.to_string();
    if debug {
        for dep in QUIET_DEPS {
            filter.push_str(&format!(",{dep}=warn"));
        }
    }
    filter
}

/// Initialize logging.
///
/// With a `MultiProgress` (TTY) the spinners carry routine progress, so only
/// warnings show unless `debug`. Without one, info lines are the progress.
pub fn init_logging(debug: bool, multi: Option<&MultiProgress>) {
    use std::io::Write;

    let filter = default_filter(debug, multi.is_some());
    let env = env_logger::Env::default().default_filter_or(filter);

    if let Some(multi) = multi {
        let logger = env_logger::Builder::from_env(env)
            .format_timestamp_millis()
            .build();
        let max_level = logger.filter();

        log::set_boxed_logger(Box::new(IndicatifLogger::new(logger, multi.clone())))
            .expect("failed to init logger");
        log::set_max_level(max_level);
    } else {
        env_logger::Builder::from_env(env)
            .format(|buf, record| {
                let (_, label, _) = level_style(record.level(), false);
                writeln!(buf, "[{label}] {}", record.args())
            })
            .init();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn filter_levels() {
        assert_eq!(default_filter(false, true), "warn");
        assert_eq!(default_filter(false, false), "info");
        let debug = default_filter(true, true);
        assert!(debug.starts_with("debug,"));
        assert!(debug.contains("html5ever=warn"));
    }

    #[test]
    fn plain_labels_have_no_ansi() {
        let (pre, label, post) = level_style(log::Level::Warn, false);
        assert_eq!((pre, label, post), ("", "WARN ", ""));
    }
}
