/// Optional plain-text log file (--log-file <path>)
use once_cell::sync::Lazy;
use parking_lot::Mutex;
use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};

use crate::arguments::log_file_path;

static LOG_FILE: Lazy<Mutex<Option<BufWriter<File>>>> = Lazy::new(|| Mutex::new(None));

/// Open the log file in append mode if one was requested
pub fn init_file_logging() {
    let Some(path) = log_file_path() else {
        return;
    };

    match OpenOptions::new().create(true).append(true).open(&path) {
        Ok(file) => {
            *LOG_FILE.lock() = Some(BufWriter::new(file));
        }
        Err(e) => {
            eprintln!("Failed to open log file {}: {}", path, e);
        }
    }
}

/// Append one line; no-op without a log file
pub fn write_to_file(line: &str) {
    if let Some(writer) = LOG_FILE.lock().as_mut() {
        let _ = writeln!(writer, "{}", line);
    }
}

pub fn flush_file_logging() {
    if let Some(writer) = LOG_FILE.lock().as_mut() {
        let _ = writer.flush();
    }
}
