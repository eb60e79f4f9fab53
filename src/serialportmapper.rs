//! IMEI → serial device path hint persistence.
//!
//! Constructed explicitly and shared via `Arc` by whoever needs it (modem
//! workers, the pool) rather than reached for as a process-global singleton —
//! see DESIGN.md for why this deviates from the original's Borg pattern.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use tracing::{info, warn};

struct Inner {
    mappings: HashMap<String, String>,
    dirty: bool,
}

/// Persists the device path a given IMEI was last found on, so that the next
/// time a wildcard-glob port is searched the known-good path is tried first.
pub struct SerialPortMapper {
    file: PathBuf,
    inner: Mutex<Inner>,
}

impl SerialPortMapper {
    /// Load hints from `file` if it exists; an absent file starts empty.
    #[must_use]
    pub fn new(file: impl Into<PathBuf>) -> Self {
        let file = file.into();
        let mappings = Self::load_hints(&file);
        Self {
            file,
            inner: Mutex::new(Inner {
                mappings,
                dirty: false,
            }),
        }
    }

    fn load_hints(file: &Path) -> HashMap<String, String> {
        let Ok(contents) = std::fs::read_to_string(file) else {
            return HashMap::new();
        };
        let mut map = HashMap::new();
        for line in contents.lines() {
            if let Some((imei, port)) = line.split_once(' ') {
                map.insert(imei.to_string(), port.to_string());
            }
        }
        map
    }

    pub fn set_mapping(&self, imei: impl Into<String>, device_name: impl Into<String>) {
        let mut inner = self.inner.lock().unwrap();
        inner.mappings.insert(imei.into(), device_name.into());
        inner.dirty = true;
    }

    #[must_use]
    pub fn get_mapping(&self, imei: &str) -> Option<String> {
        self.inner.lock().unwrap().mappings.get(imei).cloned()
    }

    /// Rewrite the backing file in full if the map has changed since the last flush.
    pub fn flush_if_dirty(&self) {
        let mut inner = self.inner.lock().unwrap();
        if !inner.dirty {
            return;
        }
        let mut out = String::new();
        for (imei, port) in &inner.mappings {
            out.push_str(imei);
            out.push(' ');
            out.push_str(port);
            out.push('\n');
        }
        match std::fs::write(&self.file, out) {
            Ok(()) => {
                inner.dirty = false;
                info!(file = %self.file.display(), "flushed serial port hints");
            }
            Err(e) => warn!(file = %self.file.display(), error = %e, "failed to flush serial port hints"),
        }
    }

    /// Spawn the periodic flush task. Ticks every 60 seconds.
    pub fn spawn_flusher(self: std::sync::Arc<Self>) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(std::time::Duration::from_secs(60));
            loop {
                interval.tick().await;
                self.flush_if_dirty();
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn loads_existing_hints() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("hints.txt");
        std::fs::write(&path, "490154203237518 /dev/ttyUSB0\n").unwrap();
        let mapper = SerialPortMapper::new(&path);
        assert_eq!(
            mapper.get_mapping("490154203237518"),
            Some("/dev/ttyUSB0".to_string())
        );
    }

    #[test]
    fn missing_file_starts_empty() {
        let dir = tempfile::tempdir().unwrap();
        let mapper = SerialPortMapper::new(dir.path().join("nonexistent.txt"));
        assert_eq!(mapper.get_mapping("anything"), None);
    }

    #[test]
    fn set_mapping_marks_dirty_and_flush_persists() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("hints.txt");
        let mapper = SerialPortMapper::new(&path);
        mapper.set_mapping("123", "/dev/ttyUSB1");
        mapper.flush_if_dirty();
        let reloaded = SerialPortMapper::new(&path);
        assert_eq!(reloaded.get_mapping("123"), Some("/dev/ttyUSB1".to_string()));
    }

    #[test]
    fn flush_without_dirty_is_a_noop() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("hints.txt");
        let mapper = SerialPortMapper::new(&path);
        mapper.flush_if_dirty();
        assert!(!path.exists());
    }
}
