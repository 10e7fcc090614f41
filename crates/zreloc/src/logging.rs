//! Relocation Logging and Tracing
//!
//! Structured events for the relocation cycle, useful for:
//! - Debugging phase transitions
//! - Inspecting which pages were relocated and retired
//! - Measuring relocation throughput
//!
//! Events are retained in memory and optionally echoed to the console in a
//! human-readable or JSON format. Fine-grained diagnostics go through the
//! `log` facade instead.
//!
//! Log Levels:
//! - ERROR: Failed relocation or retirement
//! - INFO: Relocation cycle results
//! - DEBUG: Phase flips, record installation and retirement

use crate::barrier::address_space::GlobalPhase;
use crate::config::RelocConfig;
use crate::heap::PageSizeClass;
use parking_lot::Mutex;
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

/// Log level for relocation events
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum LogLevel {
    Error = 0,
    Warn = 1,
    Info = 2,
    Debug = 3,
    Trace = 4,
}

/// Relocation event types
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RelocEvent {
    /// Global phase changed
    PhaseFlip { phase: GlobalPhase, seqnum: u32 },

    /// Forwarding record installed in the table
    RecordInstalled {
        start: u64,
        size: usize,
        size_class: PageSizeClass,
        capacity: usize,
    },

    /// All live objects of the relocation set copied
    RelocationCompleted {
        pages: usize,
        objects: u64,
        bytes: u64,
        duration_ms: f64,
    },

    /// Forwarding record removed and source page freed
    RecordRetired { start: u64, forwarded: usize },

    /// Relocation or retirement failed
    Failure { operation: String, reason: String },
}

/// Relocation logger configuration
#[derive(Debug, Clone)]
pub struct RelocLoggerConfig {
    /// Minimum log level
    pub level: LogLevel,

    /// Enable console output
    pub console: bool,

    /// Enable JSON format
    pub json: bool,

    /// Enable timestamps
    pub timestamps: bool,
}

impl RelocLoggerConfig {
    /// Console output follows `verbose`
    pub fn from_config(config: &RelocConfig) -> Self {
        Self {
            console: config.verbose,
            level: if config.verbose {
                LogLevel::Debug
            } else {
                LogLevel::Info
            },
            ..Default::default()
        }
    }
}

impl Default for RelocLoggerConfig {
    fn default() -> Self {
        Self {
            level: LogLevel::Info,
            console: false,
            json: false,
            timestamps: true,
        }
    }
}

/// Relocation logger - event log for one heap
pub struct RelocLogger {
    config: RelocLoggerConfig,
    events: Mutex<Vec<(Instant, RelocEvent)>>,
    enabled: AtomicBool,
}

impl RelocLogger {
    pub fn new(config: RelocLoggerConfig) -> Self {
        Self {
            config,
            events: Mutex::new(Vec::new()),
            enabled: AtomicBool::new(true),
        }
    }

    pub fn enable(&self) {
        self.enabled.store(true, Ordering::Relaxed);
    }

    pub fn disable(&self) {
        self.enabled.store(false, Ordering::Relaxed);
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Relaxed)
    }

    /// Log a relocation event
    pub fn log(&self, event: RelocEvent) {
        if !self.is_enabled() {
            return;
        }

        if Self::event_level(&event) > self.config.level {
            return;
        }

        if self.config.console {
            self.output_console(&event);
        }

        self.events.lock().push((Instant::now(), event));
    }

    /// Level of an event
    pub fn event_level(event: &RelocEvent) -> LogLevel {
        match event {
            RelocEvent::Failure { .. } => LogLevel::Error,
            RelocEvent::RelocationCompleted { .. } => LogLevel::Info,
            RelocEvent::PhaseFlip { .. }
            | RelocEvent::RecordInstalled { .. }
            | RelocEvent::RecordRetired { .. } => LogLevel::Debug,
        }
    }

    fn output_console(&self, event: &RelocEvent) {
        if self.config.timestamps {
            let now = chrono::Local::now();
            print!("[{}] ", now.format("%Y-%m-%d %H:%M:%S%.3f"));
        }

        if self.config.json {
            println!("{}", Self::format_json(event));
        } else {
            println!("{}", Self::format_human(event));
        }
    }

    /// One-line human-readable rendering
    pub fn format_human(event: &RelocEvent) -> String {
        match event {
            RelocEvent::PhaseFlip { phase, seqnum } => {
                format!("[RELOC] Phase {} (seq {})", phase, seqnum)
            },
            RelocEvent::RecordInstalled {
                start,
                size,
                size_class,
                capacity,
            } => format!(
                "[RELOC] Forwarding {} page {:#x} ({} bytes, {} slots)",
                size_class, start, size, capacity
            ),
            RelocEvent::RelocationCompleted {
                pages,
                objects,
                bytes,
                duration_ms,
            } => format!(
                "[RELOC] Relocated {} objects ({} bytes) from {} pages in {:.2}ms",
                objects, bytes, pages, duration_ms
            ),
            RelocEvent::RecordRetired { start, forwarded } => format!(
                "[RELOC] Retired page {:#x} ({} forwarded objects)",
                start, forwarded
            ),
            RelocEvent::Failure { operation, reason } => {
                format!("[RELOC] {} failed: {}", operation, reason)
            },
        }
    }

    /// JSON rendering
    ///
    /// Serialization failures are reported through `log` and render as an
    /// empty string.
    pub fn format_json(event: &RelocEvent) -> String {
        match serde_json::to_string(event) {
            Ok(json) => json,
            Err(e) => {
                log::warn!("failed to serialize {:?}: {}", event, e);
                String::new()
            }
        }
    }

    /// Get all events
    pub fn events(&self) -> Vec<(Instant, RelocEvent)> {
        self.events.lock().clone()
    }

    pub fn clear_events(&self) {
        self.events.lock().clear();
    }

    pub fn event_count(&self) -> usize {
        self.events.lock().len()
    }
}

impl Default for RelocLogger {
    fn default() -> Self {
        Self::new(RelocLoggerConfig::default())
    }
}
