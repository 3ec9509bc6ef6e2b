//! Configurations, corpora and source files used across harnesses.

use chrono::{NaiveDate, NaiveDateTime};
use logtap::StreamHub;
use logtap_core::{ClockFormat, Config};
use std::io::Write;
use tempfile::NamedTempFile;

/// Lines with a clock prefix, as an application would write them.
pub const CORPUS_CLOCK: &[&str] = &[
    "10:00:00.000 INFO  Starting application version 2.4.1",
    "10:00:00.250 INFO  Listening on 0.0.0.0:8080",
    "10:00:01.000 ERROR Failed to connect to database after 3 retries",
    "10:00:01.100 WARN  Disk usage at 92% on /dev/sda1",
    "    at com.example.App.handle(App.java:42)",
    "10:00:02.000 INFO  heartbeat",
    "10:00:03.000 INFO  heartbeat",
    "10:00:04.000 ERROR payment gateway timeout",
];

pub fn reference_date() -> NaiveDate {
    NaiveDate::from_ymd_opt(2024, 1, 15).expect("valid date")
}

pub fn at(h: u32, m: u32, s: u32, ms: u32) -> NaiveDateTime {
    reference_date()
        .and_hms_milli_opt(h, m, s, ms)
        .expect("valid time")
}

/// Defaults tightened so tests see blocks, ticks and retries quickly.
pub fn fast_config() -> Config {
    let mut config = Config::defaults();
    config.reader.min_block_size = 1;
    config.reader.min_block_time_ms = 1;
    config.reader.max_block_time_ms = 50;
    config.reader.read_timeout_ms = 50;
    config.reader.eof_poll_interval_ms = 10;
    config.publisher.poll_interval_ms = 5;
    config.connector.reconnect_delay_ms = 50;
    config.buffer.eviction_interval_ms = 10;
    config
}

/// A hub whose time-only timestamps land on [`reference_date`].
pub fn hub_with(config: &Config) -> StreamHub {
    StreamHub::with_extractor(
        config,
        Box::new(ClockFormat::with_reference_date(
            config.timestamp.format.clone(),
            reference_date(),
        )),
    )
}

pub fn hub() -> StreamHub {
    hub_with(&fast_config())
}

pub fn log_file(lines: &[&str]) -> NamedTempFile {
    let mut file = NamedTempFile::new().expect("create temp file");
    for line in lines {
        writeln!(file, "{line}").expect("write temp file");
    }
    file.flush().expect("flush temp file");
    file
}

pub fn owned(lines: &[&str]) -> Vec<String> {
    lines.iter().map(|s| s.to_string()).collect()
}
