use chrono::Local;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::Path;
use std::sync::Mutex;

/// Append-only `errors.log`. A disabled log swallows writes.
pub struct ErrorLog {
    file: Option<Mutex<File>>,
}

impl ErrorLog {
    pub fn open(path: &Path) -> std::io::Result<Self> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self {
            file: Some(Mutex::new(file)),
        })
    }

    pub fn disabled() -> Self {
        Self { file: None }
    }

    pub fn record(&self, message: &str) {
        if let Some(ref file) = self.file {
            if let Ok(mut f) = file.lock() {
                writeln!(f, "[INGEST] {} {}", Local::now().format("%Y-%m-%d %H:%M:%S"), message).ok();
            }
        }
    }
}
