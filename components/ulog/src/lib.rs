//! Logging helpers for tests.
//!
//! Every record goes through the `env_logger` formatter and, once [`try_init_log`] installed the logger, is
//! also kept in memory so that tests can assert on what a component logged. Tests of one binary share the
//! logger, thus assertions should filter by something unique to the test, such as a query id.

use lazy_static::lazy_static;
use log::{Log, Metadata, Record};
use parking_lot::Mutex;

lazy_static! {
    static ref CAPTURED: Mutex<Vec<String>> = Mutex::new(Vec::new());
}

fn format_record(record: &Record) -> String {
    format!(
        "{}:{} {} [{}] - {}",
        record.file().unwrap_or("unknown"),
        record.line().unwrap_or(0),
        chrono::Local::now().format("%Y-%m-%dT%H:%M:%S%.3f"),
        record.level(),
        record.args()
    )
}

struct CapturingLogger<L> {
    inner: L,
}

impl<L> Log for CapturingLogger<L>
where
    L: Log,
{
    fn enabled(&self, metadata: &Metadata) -> bool {
        self.inner.enabled(metadata)
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }
        CAPTURED.lock().push(format_record(record));
        self.inner.log(record);
    }

    fn flush(&self) {
        self.inner.flush();
    }
}

#[cfg(feature = "env")]
pub fn try_init_log() {
    use std::io::Write;

    let inner = env_logger::builder()
        .is_test(true)
        .filter_level(log::LevelFilter::Debug)
        .parse_default_env()
        .format(|buf, record| writeln!(buf, "{}", format_record(record)))
        .build();
    let max_level = inner.filter();
    if log::set_boxed_logger(Box::new(CapturingLogger { inner })).is_ok() {
        log::set_max_level(max_level);
    }
}

/// Captured lines containing every one of the given fragments.
pub fn captured_lines(fragments: &[&str]) -> Vec<String> {
    CAPTURED
        .lock()
        .iter()
        .filter(|line| fragments.iter().all(|fragment| line.contains(fragment)))
        .cloned()
        .collect()
}

#[cfg(test)]
mod tests {
    #[cfg(feature = "env")]
    #[test]
    fn test_init_log() {
        super::try_init_log();
        super::try_init_log();
        log::trace!("Record at trace");
        log::debug!("Record at debug");
        log::info!("Record at info, id=ulog-test");
        log::warn!("Record at warn");
        log::error!("Record at error");

        let lines = super::captured_lines(&["id=ulog-test", "[INFO]"]);
        assert_eq!(1, lines.len());
        assert!(lines[0].contains("lib.rs"));
    }
}
