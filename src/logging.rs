// src/logging.rs
//
// Timestamped logging for the server process.
// Every tlog! line goes to stderr; when file logging is enabled it is
// mirrored into an append-only log file under the configured directory.

use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

/// Mirror target for `tlog!`. `None` means stderr only.
pub(crate) static LOG_FILE: Mutex<Option<File>> = Mutex::new(None);

/// Write one already-formatted line to stderr and, if enabled, the log file.
pub(crate) fn write_line(msg: &str) {
    eprintln!("{}", msg);
    if let Ok(mut guard) = LOG_FILE.lock() {
        if let Some(ref mut f) = *guard {
            let _ = writeln!(f, "{}", msg);
        }
    }
}

/// Enable file logging under `log_dir`.
/// Creates the directory if missing, opens a timestamped log file and
/// points a `linetap.log` symlink at it (Unix only; Windows symlinks
/// require elevated privileges). Returns the path of the new file.
pub(crate) fn init_file_logging(log_dir: &Path) -> Result<PathBuf, String> {
    std::fs::create_dir_all(log_dir).map_err(|e| format!("Failed to create log dir: {}", e))?;

    let filename = chrono::Local::now()
        .format("%Y%m%d-%H%M%S-linetap.log")
        .to_string();
    let log_path = log_dir.join(&filename);

    let file = File::options()
        .create(true)
        .append(true)
        .open(&log_path)
        .map_err(|e| format!("Failed to create log file: {}", e))?;

    #[cfg(unix)]
    {
        let symlink_path = log_dir.join("linetap.log");
        let _ = std::fs::remove_file(&symlink_path);
        let _ = std::os::unix::fs::symlink(&filename, &symlink_path);
    }

    if let Ok(mut guard) = LOG_FILE.lock() {
        *guard = Some(file);
    }

    // tlog! is defined below this point, so call the sink directly here
    write_line(&format!(
        "{} [logging] File logging started: {}",
        chrono::Local::now().format("%H:%M:%S%.3f"),
        log_path.display()
    ));
    Ok(log_path)
}

/// Stop file logging and close the log file.
pub(crate) fn stop_file_logging() {
    if let Ok(mut guard) = LOG_FILE.lock() {
        if guard.take().is_some() {
            eprintln!(
                "{} [logging] File logging stopped",
                chrono::Local::now().format("%H:%M:%S%.3f")
            );
        }
    }
}

/// Timestamped logging macro.
/// Prepends `HH:MM:SS.mmm` local time to every message.
macro_rules! tlog {
    ($($arg:tt)*) => {{
        let msg = format!(
            "{} {}",
            chrono::Local::now().format("%H:%M:%S%.3f"),
            format_args!($($arg)*)
        );
        $crate::logging::write_line(&msg);
    }};
}

#[cfg(test)]
mod tests {
    #[test]
    fn tlog_does_not_panic_without_file() {
        tlog!("[test] plain message {}", 42);
    }
}
