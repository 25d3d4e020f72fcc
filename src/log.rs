use std::fs::OpenOptions;
use std::io::Write;

const LOG_FILE: &str = "train.log";

// Shared writer: format the line once, mirror it to stdout and the log file.
fn write_line(level: &str, msg: &str) {
    let stamp = chrono::Local::now().format("%Y-%m-%d %H:%M:%S%.3f");
    let line = format!("[{stamp}] {level}: {msg}\n");
    print!("{line}");
    // A failed log write must never take the training process down.
    if let Ok(mut f) = OpenOptions::new().create(true).append(true).open(LOG_FILE) {
        let _ = f.write_all(line.as_bytes());
    }
}

pub fn info(msg: &str) {
    write_line("INFO", msg);
}

pub fn warn(msg: &str) {
    write_line("WARN", msg);
}

pub fn error(msg: &str) {
    write_line("ERROR", msg);
}

/// Numeric metrics in one grep-friendly format:
/// `SCALAR step=<..> name=<..> value=<..>`.
pub fn scalar(step: u64, name: &str, value: f32) {
    let stamp = chrono::Local::now().format("%Y-%m-%d %H:%M:%S%.3f");
    let line = format!("[{stamp}] SCALAR step={step} name={name} value={value:.6}\n");
    print!("{line}");
    if let Ok(mut f) = OpenOptions::new().create(true).append(true).open(LOG_FILE) {
        let _ = f.write_all(line.as_bytes());
    }
}
