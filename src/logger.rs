//! Diagnostic log for the incremental analysis.
//!
//! A process-wide single writer with two sinks: an in-memory buffer (the
//! default, so early phases can log before the driver knows the log path) and
//! a `.log` file installed later, plus an optional stdout mirror. Every write
//! goes through one mutex and lands as whole lines, so the log of two runs
//! over equal inputs is equal byte for byte. Plain UTF-8 only, no ANSI.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;
use std::sync::{Mutex, OnceLock};

/// Width of the `=` delimiter rows that open and close a log section.
pub const DELIMITER_WIDTH: usize = 60;

enum Sink {
    Buffer(String),
    File(BufWriter<File>),
}

struct LoggerState {
    debug_print: bool,
    save_log_file: bool,
    sink: Sink,
}

pub struct IncrLogger {
    state: Mutex<LoggerState>,
}

static LOGGER: OnceLock<IncrLogger> = OnceLock::new();

/// The process-wide logger instance.
pub fn logger() -> &'static IncrLogger {
    LOGGER.get_or_init(|| IncrLogger {
        state: Mutex::new(LoggerState {
            debug_print: false,
            save_log_file: false,
            sink: Sink::Buffer(String::new()),
        }),
    })
}

impl IncrLogger {
    /// Mirror every line to stdout as well.
    pub fn set_debug_print(&self, flag: bool) {
        self.state.lock().unwrap().debug_print = flag;
    }

    /// Install the log file. Rejected silently unless the path ends in `.log`
    /// and its parent directory exists; anything buffered so far is flushed
    /// into the file.
    pub fn init_log_file(&self, path: &Path) {
        if path.extension().and_then(|e| e.to_str()) != Some("log") {
            return;
        }
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                return;
            }
        }
        let Ok(file) = File::create(path) else {
            return;
        };
        let mut state = self.state.lock().unwrap();
        let mut writer = BufWriter::new(file);
        if let Sink::Buffer(buffered) = &state.sink {
            let _ = writer.write_all(buffered.as_bytes());
        }
        state.sink = Sink::File(writer);
        state.save_log_file = true;
    }

    pub fn is_enabled(&self) -> bool {
        let state = self.state.lock().unwrap();
        state.debug_print || state.save_log_file
    }

    pub fn log(&self, input: &str) {
        let mut state = self.state.lock().unwrap();
        if state.debug_print {
            print!("{input}");
        }
        match &mut state.sink {
            Sink::Buffer(buf) => buf.push_str(input),
            Sink::File(writer) => {
                let _ = writer.write_all(input.as_bytes());
            }
        }
    }

    pub fn log_line(&self, input: &str) {
        let mut state = self.state.lock().unwrap();
        if state.debug_print {
            println!("{input}");
        }
        match &mut state.sink {
            Sink::Buffer(buf) => {
                buf.push_str(input);
                buf.push('\n');
            }
            Sink::File(writer) => {
                let _ = writer.write_all(input.as_bytes());
                let _ = writer.write_all(b"\n");
            }
        }
    }

    /// Open a delimited section: a row of `=`, then the title on its own line.
    pub fn section(&self, title: &str) {
        self.log_line(&"=".repeat(DELIMITER_WIDTH));
        self.log_line(title);
    }

    /// Close a section with a delimiter row.
    pub fn end_section(&self) {
        self.log_line(&"=".repeat(DELIMITER_WIDTH));
    }

    pub fn flush(&self) {
        let mut state = self.state.lock().unwrap();
        if let Sink::File(writer) = &mut state.sink {
            let _ = writer.flush();
        }
    }

    /// Contents of the in-memory buffer (empty once a file sink is installed).
    pub fn buffered(&self) -> String {
        let state = self.state.lock().unwrap();
        match &state.sink {
            Sink::Buffer(buf) => buf.clone(),
            Sink::File(_) => String::new(),
        }
    }

    #[cfg(test)]
    fn reset_for_test(&self) {
        let mut state = self.state.lock().unwrap();
        state.debug_print = false;
        state.save_log_file = false;
        state.sink = Sink::Buffer(String::new());
    }
}
