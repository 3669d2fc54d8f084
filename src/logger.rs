use std::io::Write;
use std::time::Instant;

use log::{Level, LevelFilter, Log, Metadata, Record};
use parking_lot::Mutex;

struct ParRunLogger {
    file: Option<Mutex<std::fs::File>>,
    stderr_filter: LevelFilter,
    filter: LevelFilter,
    start: Instant,
}

impl Log for ParRunLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= self.filter
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }

        let elapsed = self.start.elapsed().as_secs_f64();
        if record.level() <= self.stderr_filter {
            eprintln!("{}", format_record(record));
        }

        if let Some(ref file) = self.file {
            let _ = writeln!(
                file.lock(),
                "[{elapsed:.3}s] [{}] {}: {}",
                record.level(),
                record.target(),
                record.args()
            );
        }
    }

    fn flush(&self) {
        if let Some(ref file) = self.file {
            let _ = file.lock().flush();
        }
    }
}

fn format_record(record: &Record) -> String {
    let label = match record.level() {
        Level::Error => "error",
        Level::Warn => "warning",
        Level::Info => "info",
        Level::Debug => "debug",
        Level::Trace => "trace",
    };
    format!("par-run {label}: {}", record.args())
}

/// Initialize the global logger. Must be called once before any logging.
///
/// `RUST_LOG` (a plain level such as `debug`) sets the filter, defaulting to `warn` on stderr.
/// A log file, when given, receives `info` and above regardless of the stderr filter.
///
/// # Panics
///
/// Panics if called more than once.
pub fn init(log_file: Option<std::fs::File>) {
    let stderr_filter = std::env::var("RUST_LOG")
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(LevelFilter::Warn);
    let filter = if log_file.is_some() {
        stderr_filter.max(LevelFilter::Info)
    } else {
        stderr_filter
    };

    let logger = ParRunLogger {
        file: log_file.map(Mutex::new),
        stderr_filter,
        filter,
        start: Instant::now(),
    };

    log::set_boxed_logger(Box::new(logger)).expect("logger already initialized");
    log::set_max_level(filter);
}
