//! USB-HID keyboard output
//!
//! Every key stroke becomes two boot-protocol reports: a press report
//! `[modifier, 0, keycode, 0, 0, 0, 0, 0]` held for `press_ms`, then an
//! all-zero release report held for `release_ms`.

use super::keymap::KeyStroke;
use crate::clock::Clock;
use crate::config::HidConfig;
use log::{debug, info};
use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use thiserror::Error;

/// Eight-byte boot keyboard report
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct KeyReport(pub [u8; 8]);

impl KeyReport {
    pub fn press(stroke: KeyStroke) -> Self {
        Self([stroke.modifier, 0, stroke.keycode, 0, 0, 0, 0, 0])
    }

    pub fn release() -> Self {
        Self([0; 8])
    }

    pub fn modifier(&self) -> u8 {
        self.0[0]
    }

    pub fn keycode(&self) -> u8 {
        self.0[2]
    }

    pub fn is_release(&self) -> bool {
        self.0 == [0; 8]
    }

    pub fn as_bytes(&self) -> &[u8; 8] {
        &self.0
    }
}

#[derive(Debug, Error)]
pub enum HidError {
    #[error("failed to open HID device {path}: {source}")]
    Open { path: PathBuf, source: io::Error },
    #[error("failed to write HID report: {0}")]
    Write(#[from] io::Error),
}

/// Destination for keyboard reports
pub trait KeyReportSink: Send {
    fn send_report(&mut self, report: &KeyReport) -> Result<(), HidError>;
}

/// Keyboard that taps strokes with fixed press and release hold times
pub struct HidKeyboard {
    sink: Box<dyn KeyReportSink>,
    clock: Box<dyn Clock>,
    press_ms: u64,
    release_ms: u64,
    reports_sent: u64,
}

impl HidKeyboard {
    /// Keyboard with the default 10 ms press and 10 ms release
    pub fn new(sink: Box<dyn KeyReportSink>, clock: Box<dyn Clock>) -> Self {
        Self::with_config(sink, clock, &HidConfig::default())
    }

    pub fn with_config(sink: Box<dyn KeyReportSink>, clock: Box<dyn Clock>, config: &HidConfig) -> Self {
        Self {
            sink,
            clock,
            press_ms: config.press_ms,
            release_ms: config.release_ms,
            reports_sent: 0,
        }
    }

    /// Press and release one stroke
    pub fn tap(&mut self, stroke: KeyStroke) -> Result<(), HidError> {
        debug!("HID tap mod={:02X} key={:02X}", stroke.modifier, stroke.keycode);
        self.sink.send_report(&KeyReport::press(stroke))?;
        self.reports_sent += 1;
        self.clock.sleep_ms(self.press_ms);

        self.sink.send_report(&KeyReport::release())?;
        self.reports_sent += 1;
        self.clock.sleep_ms(self.release_ms);
        Ok(())
    }

    /// Total reports written, press and release counted separately
    pub fn reports_sent(&self) -> u64 {
        self.reports_sent
    }

    pub fn clock(&self) -> &dyn Clock {
        self.clock.as_ref()
    }
}

/// A report and the clock time it was sent at
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecordedReport {
    pub at_ms: u64,
    pub report: KeyReport,
}

/// Sink that keeps every report in memory.
///
/// Clones share the same log, so a test can keep one handle while the
/// keyboard owns the other.
#[derive(Clone)]
pub struct RecordingSink {
    clock: Arc<dyn Clock + Sync>,
    log: Arc<Mutex<Vec<RecordedReport>>>,
}

impl RecordingSink {
    pub fn new(clock: impl Clock + Sync + 'static) -> Self {
        Self {
            clock: Arc::new(clock),
            log: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn reports(&self) -> Vec<RecordedReport> {
        self.log.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Press reports only, in order
    pub fn presses(&self) -> Vec<RecordedReport> {
        self.reports()
            .into_iter()
            .filter(|r| !r.report.is_release())
            .collect()
    }

    pub fn clear(&self) {
        self.log.lock().unwrap_or_else(|e| e.into_inner()).clear();
    }
}

impl KeyReportSink for RecordingSink {
    fn send_report(&mut self, report: &KeyReport) -> Result<(), HidError> {
        let at_ms = self.clock.now_ms();
        self.log
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(RecordedReport { at_ms, report: *report });
        Ok(())
    }
}

/// Linux USB gadget keyboard (`/dev/hidgN`)
pub struct HidgSink {
    path: PathBuf,
    file: File,
}

impl HidgSink {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, HidError> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new()
            .write(true)
            .open(&path)
            .map_err(|source| HidError::Open {
                path: path.clone(),
                source,
            })?;
        info!("Opened HID gadget {}", path.display());
        Ok(Self { path, file })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl KeyReportSink for HidgSink {
    fn send_report(&mut self, report: &KeyReport) -> Result<(), HidError> {
        self.file.write_all(report.as_bytes())?;
        self.file.flush()?;
        Ok(())
    }
}

/// Sink that discards reports, for dry runs on hosts without a gadget
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSink;

impl KeyReportSink for NullSink {
    fn send_report(&mut self, _report: &KeyReport) -> Result<(), HidError> {
        Ok(())
    }
}
