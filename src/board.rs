//! Board handle table
//!
//! `Board` owns the storage session and script engine for the lifetime of
//! the program; there is no other global state. Hardware-style inputs reach
//! it only through [`BootButton`], whose edge handler just records a flag and
//! a timestamp. The tick loop consumes both.

use crate::config::{Config, StorageConfig};
use crate::keyboard::us_layout_json;
use crate::keyboard::layout::layout_path;
use crate::report::RunReport;
use crate::script::{ScriptEngine, ScriptError};
use crate::storage::{SessionError, StorageSession};
use log::{info, warn};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

/// Minimum spacing between accepted button edges
pub const BUTTON_DEBOUNCE_MS: u64 = 200;

const NEVER: u64 = u64::MAX;

/// Debounced button flag, safe to signal from any thread
#[derive(Debug)]
pub struct BootButton {
    pressed: AtomicBool,
    last_edge_ms: AtomicU64,
}

impl Default for BootButton {
    fn default() -> Self {
        Self {
            pressed: AtomicBool::new(false),
            last_edge_ms: AtomicU64::new(NEVER),
        }
    }
}

impl BootButton {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a falling edge at `now_ms`. Returns false if it was debounced.
    pub fn on_edge(&self, now_ms: u64) -> bool {
        let last = self.last_edge_ms.load(Ordering::Acquire);
        if last != NEVER && now_ms.saturating_sub(last) <= BUTTON_DEBOUNCE_MS {
            return false;
        }
        self.last_edge_ms.store(now_ms, Ordering::Release);
        self.pressed.store(true, Ordering::Release);
        true
    }

    /// Consume a pending press
    pub fn take_press(&self) -> bool {
        self.pressed.swap(false, Ordering::AcqRel)
    }
}

/// Storage events observed through the session callbacks
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CardEvent {
    Mounted,
    Unmounted,
    Inserted,
    Removed,
}

impl CardEvent {
    pub fn describe(&self) -> &'static str {
        match self {
            Self::Mounted => "Card mounted",
            Self::Unmounted => "Card unmounted",
            Self::Inserted => "Card inserted",
            Self::Removed => "Card removed",
        }
    }
}

/// What happened during one tick
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Tick {
    pub button_pressed: bool,
    pub card_events: Vec<CardEvent>,
}

/// The single process-wide handle table
pub struct Board {
    storage: StorageSession,
    engine: ScriptEngine,
    button: Arc<BootButton>,
    events: Arc<Mutex<Vec<CardEvent>>>,
    storage_config: StorageConfig,
    layouts_dir: String,
    script_extension: String,
    scripts: Vec<String>,
}

impl Board {
    pub fn new(storage: StorageSession, engine: ScriptEngine, config: &Config) -> Self {
        Self {
            storage,
            engine,
            button: Arc::new(BootButton::new()),
            events: Arc::new(Mutex::new(Vec::new())),
            storage_config: config.storage.clone(),
            layouts_dir: config.script.layouts_dir.clone(),
            script_extension: config.script.script_extension.clone(),
            scripts: Vec::new(),
        }
    }

    /// Register the session callbacks and attempt the first mount
    pub fn init(&mut self) -> bool {
        let events = Arc::clone(&self.events);
        let recorder = |event: CardEvent| {
            let events = Arc::clone(&events);
            move || events.lock().unwrap_or_else(|e| e.into_inner()).push(event)
        };
        self.storage.on_mount(recorder(CardEvent::Mounted));
        self.storage.on_unmount(recorder(CardEvent::Unmounted));
        self.storage.on_card_inserted(recorder(CardEvent::Inserted));
        self.storage.on_card_removed(recorder(CardEvent::Removed));

        let cfg = &self.storage_config;
        let mounted = self
            .storage
            .mount(cfg.format_if_failed, &cfg.mount_point, cfg.one_bit_mode);
        if mounted {
            self.scan_scripts();
        } else {
            warn!("Initial mount failed: {}", self.storage.last_error_message());
        }
        mounted
    }

    /// Poll hot-swap and the button. Call every loop iteration.
    pub fn tick(&mut self) -> Tick {
        self.storage.check_hot_swap();
        let card_events: Vec<CardEvent> = std::mem::take(
            &mut *self.events.lock().unwrap_or_else(|e| e.into_inner()),
        );
        if card_events.contains(&CardEvent::Mounted) {
            self.scan_scripts();
        } else if card_events.contains(&CardEvent::Removed) {
            self.scripts.clear();
        }
        Tick {
            button_pressed: self.button.take_press(),
            card_events,
        }
    }

    /// List script files in the card root, mounting first if needed
    pub fn scan_scripts(&mut self) -> &[String] {
        self.scripts.clear();

        if !self.storage.is_mounted() {
            info!("SD card not mounted, attempting mount");
            let cfg = &self.storage_config;
            if !self.storage.mount(false, &cfg.mount_point, cfg.one_bit_mode) {
                warn!("Failed to mount SD card");
                return &self.scripts;
            }
        }

        match self.storage.list_entries("/") {
            Ok(entries) => {
                self.scripts = entries
                    .into_iter()
                    .filter(|e| !e.is_dir && e.name.ends_with(&self.script_extension))
                    .map(|e| e.name)
                    .collect();
            }
            Err(e) => warn!("Failed to list scripts: {}", e),
        }
        info!("Total scripts found: {}", self.scripts.len());
        &self.scripts
    }

    pub fn scripts(&self) -> &[String] {
        &self.scripts
    }

    pub fn run_script(&mut self, name: &str) -> Result<RunReport, ScriptError> {
        self.engine.run(&mut self.storage, name)
    }

    /// Write the built-in US layout to the card if it has none
    pub fn seed_layout(&mut self) -> Result<bool, SessionError> {
        let path = layout_path(&self.layouts_dir, "US");
        if self.storage.exists(&path) {
            return Ok(false);
        }
        if !self.storage.exists(&self.layouts_dir) {
            self.storage.mkdir(&self.layouts_dir)?;
        }
        self.storage.write_file(&path, us_layout_json().as_bytes())?;
        info!("Wrote default layout to {}", path);
        Ok(true)
    }

    /// Mount if unmounted, unmount if mounted
    pub fn toggle_mount(&mut self) -> bool {
        if self.storage.is_mounted() {
            self.storage.unmount();
            self.scripts.clear();
            false
        } else {
            let cfg = &self.storage_config;
            let mounted = self
                .storage
                .mount(cfg.format_if_failed, &cfg.mount_point, cfg.one_bit_mode);
            if mounted {
                self.scan_scripts();
            }
            mounted
        }
    }

    /// Handle for signalling button edges from the input path
    pub fn button(&self) -> Arc<BootButton> {
        Arc::clone(&self.button)
    }

    pub fn storage(&self) -> &StorageSession {
        &self.storage
    }

    pub fn storage_mut(&mut self) -> &mut StorageSession {
        &mut self.storage
    }

    pub fn engine(&self) -> &ScriptEngine {
        &self.engine
    }

    /// Unmount and drop pending events
    pub fn teardown(&mut self) {
        if self.storage.is_mounted() {
            self.storage.unmount();
        }
        self.events.lock().unwrap_or_else(|e| e.into_inner()).clear();
        self.scripts.clear();
        info!("Board shut down");
    }
}
