//! Bridge Logging and Tracing
//!
//! Structured events for guard, type, resolution and hook activity, useful for:
//! - Debugging lifetime problems (who pinned what, when it was released)
//! - Auditing which entry points were patched
//! - Post-mortem of fatal terminations
//!
//! Diagnostic text goes through the `log` facade; events are additionally
//! kept in a bounded in-memory buffer and optionally mirrored to stdout.
//!
//! Log Levels:
//! - ERROR: lifecycle hazards, unhandled exceptions, fatal
//! - INFO: types defined, hooks installed
//! - DEBUG: resolutions, instance construction/destruction
//! - TRACE: per-guard pin/unpin

use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

/// Log level for bridge events
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum LogLevel {
    Error = 0,
    Warn = 1,
    Info = 2,
    Debug = 3,
    Trace = 4,
}

/// Bridge event types
#[derive(Debug, Clone, PartialEq)]
pub enum BridgeEvent {
    /// Pin count of a handle increased
    GuardPinned { handle: usize, pins: usize },

    /// Pin count of a handle decreased
    GuardUnpinned { handle: usize, pins: usize },

    /// Last pin dropped; handle left the root set
    RootErased { handle: usize },

    /// Bridged type registered
    TypeDefined {
        name: String,
        fields: usize,
        methods: usize,
    },

    /// Native constructor path completed
    InstanceConstructed { type_name: String, handle: usize },

    /// Native destructor path completed
    InstanceDestroyed { type_name: String, handle: usize },

    /// Signature resolved
    MethodResolved {
        signature: String,
        address: usize,
        cached: bool,
    },

    /// Entry point patched
    HookInstalled {
        signature: String,
        address: usize,
        trampoline: usize,
    },

    /// Double construct/destruct detected
    LifecycleHazard { description: String },

    /// Managed exception reached a native caller
    ManagedException { class_name: String, message: String },

    /// Process is about to abort
    Fatal { reason: String },
}

/// Bridge logger configuration
#[derive(Debug, Clone)]
pub struct BridgeLoggerConfig {
    /// Minimum log level
    pub level: LogLevel,

    /// Enable console output
    pub console: bool,

    /// Enable JSON format
    pub json: bool,

    /// Enable timestamps
    pub timestamps: bool,

    /// Events kept in memory; oldest are dropped first
    pub capacity: usize,
}

impl Default for BridgeLoggerConfig {
    fn default() -> Self {
        Self {
            level: LogLevel::Debug,
            console: false,
            json: false,
            timestamps: true,
            capacity: 1024,
        }
    }
}

/// Bridge logger - centralized structured logging
pub struct BridgeLogger {
    config: BridgeLoggerConfig,
    events: Mutex<VecDeque<(Instant, BridgeEvent)>>,
    enabled: AtomicBool,
}

impl BridgeLogger {
    /// Create new logger
    pub fn new(config: BridgeLoggerConfig) -> Self {
        Self {
            config,
            events: Mutex::new(VecDeque::new()),
            enabled: AtomicBool::new(true),
        }
    }

    /// Enable logging
    pub fn enable(&self) {
        self.enabled.store(true, Ordering::Relaxed);
    }

    /// Disable logging
    pub fn disable(&self) {
        self.enabled.store(false, Ordering::Relaxed);
    }

    /// Check if logging is enabled
    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Relaxed)
    }

    /// Log an event
    pub fn log(&self, event: BridgeEvent) {
        if !self.is_enabled() {
            return;
        }

        let event_level = Self::event_level(&event);
        if event_level > self.config.level {
            return;
        }

        self.forward(event_level, &event);

        if self.config.console {
            self.output_console(&event);
        }

        let mut events = self.events.lock();
        if self.config.capacity > 0 && events.len() >= self.config.capacity {
            events.pop_front();
        }
        events.push_back((Instant::now(), event));
    }

    /// Get log level for event
    fn event_level(event: &BridgeEvent) -> LogLevel {
        match event {
            BridgeEvent::LifecycleHazard { .. }
            | BridgeEvent::ManagedException { .. }
            | BridgeEvent::Fatal { .. } => LogLevel::Error,
            BridgeEvent::TypeDefined { .. } | BridgeEvent::HookInstalled { .. } => LogLevel::Info,
            BridgeEvent::MethodResolved { .. }
            | BridgeEvent::InstanceConstructed { .. }
            | BridgeEvent::InstanceDestroyed { .. }
            | BridgeEvent::RootErased { .. } => LogLevel::Debug,
            BridgeEvent::GuardPinned { .. } | BridgeEvent::GuardUnpinned { .. } => LogLevel::Trace,
        }
    }

    /// Forward to the `log` facade
    fn forward(&self, level: LogLevel, event: &BridgeEvent) {
        let text = Self::human(event);
        match level {
            LogLevel::Error => log::error!(target: "mbridge", "{}", text),
            LogLevel::Warn => log::warn!(target: "mbridge", "{}", text),
            LogLevel::Info => log::info!(target: "mbridge", "{}", text),
            LogLevel::Debug => log::debug!(target: "mbridge", "{}", text),
            LogLevel::Trace => log::trace!(target: "mbridge", "{}", text),
        }
    }

    /// Output to console
    fn output_console(&self, event: &BridgeEvent) {
        let prefix = if self.config.timestamps {
            format!("[{}] ", chrono::Local::now().format("%Y-%m-%d %H:%M:%S%.3f"))
        } else {
            String::new()
        };

        if self.config.json {
            if let Ok(json_str) = serde_json::to_string(&Self::json(event)) {
                println!("{}{}", prefix, json_str);
            }
        } else {
            println!("{}{}", prefix, Self::human(event));
        }
    }

    /// Human-readable rendering
    fn human(event: &BridgeEvent) -> String {
        match event {
            BridgeEvent::GuardPinned { handle, pins } => {
                format!("[bridge] pin {:#x} (pins={})", handle, pins)
            },
            BridgeEvent::GuardUnpinned { handle, pins } => {
                format!("[bridge] unpin {:#x} (pins={})", handle, pins)
            },
            BridgeEvent::RootErased { handle } => {
                format!("[bridge] root {:#x} erased", handle)
            },
            BridgeEvent::TypeDefined {
                name,
                fields,
                methods,
            } => format!(
                "[bridge] type {} defined ({} fields, {} methods)",
                name, fields, methods
            ),
            BridgeEvent::InstanceConstructed { type_name, handle } => {
                format!("[bridge] {} {:#x} constructed", type_name, handle)
            },
            BridgeEvent::InstanceDestroyed { type_name, handle } => {
                format!("[bridge] {} {:#x} destroyed", type_name, handle)
            },
            BridgeEvent::MethodResolved {
                signature,
                address,
                cached,
            } => format!(
                "[bridge] resolved {} -> {:#x}{}",
                signature,
                address,
                if *cached { " (cached)" } else { "" }
            ),
            BridgeEvent::HookInstalled {
                signature,
                address,
                trampoline,
            } => format!(
                "[bridge] hooked {} at {:#x}, trampoline {:#x}",
                signature, address, trampoline
            ),
            BridgeEvent::LifecycleHazard { description } => {
                format!("[bridge] lifecycle hazard: {}", description)
            },
            BridgeEvent::ManagedException {
                class_name,
                message,
            } => format!("[bridge] unhandled {}: {}", class_name, message),
            BridgeEvent::Fatal { reason } => format!("[bridge] FATAL: {}", reason),
        }
    }

    /// JSON rendering
    fn json(event: &BridgeEvent) -> serde_json::Value {
        match event {
            BridgeEvent::GuardPinned { handle, pins } => serde_json::json!({
                "type": "guard_pinned",
                "handle": handle,
                "pins": pins
            }),
            BridgeEvent::GuardUnpinned { handle, pins } => serde_json::json!({
                "type": "guard_unpinned",
                "handle": handle,
                "pins": pins
            }),
            BridgeEvent::RootErased { handle } => serde_json::json!({
                "type": "root_erased",
                "handle": handle
            }),
            BridgeEvent::TypeDefined {
                name,
                fields,
                methods,
            } => serde_json::json!({
                "type": "type_defined",
                "name": name,
                "fields": fields,
                "methods": methods
            }),
            BridgeEvent::InstanceConstructed { type_name, handle } => serde_json::json!({
                "type": "instance_constructed",
                "type_name": type_name,
                "handle": handle
            }),
            BridgeEvent::InstanceDestroyed { type_name, handle } => serde_json::json!({
                "type": "instance_destroyed",
                "type_name": type_name,
                "handle": handle
            }),
            BridgeEvent::MethodResolved {
                signature,
                address,
                cached,
            } => serde_json::json!({
                "type": "method_resolved",
                "signature": signature,
                "address": address,
                "cached": cached
            }),
            BridgeEvent::HookInstalled {
                signature,
                address,
                trampoline,
            } => serde_json::json!({
                "type": "hook_installed",
                "signature": signature,
                "address": address,
                "trampoline": trampoline
            }),
            BridgeEvent::LifecycleHazard { description } => serde_json::json!({
                "type": "lifecycle_hazard",
                "description": description
            }),
            BridgeEvent::ManagedException {
                class_name,
                message,
            } => serde_json::json!({
                "type": "managed_exception",
                "class_name": class_name,
                "message": message
            }),
            BridgeEvent::Fatal { reason } => serde_json::json!({
                "type": "fatal",
                "reason": reason
            }),
        }
    }

    /// Get all buffered events
    pub fn get_events(&self) -> Vec<(Instant, BridgeEvent)> {
        self.events.lock().iter().cloned().collect()
    }

    /// Clear all events
    pub fn clear_events(&self) {
        self.events.lock().clear();
    }

    /// Get event count
    pub fn event_count(&self) -> usize {
        self.events.lock().len()
    }
}

impl Default for BridgeLogger {
    fn default() -> Self {
        Self::new(BridgeLoggerConfig::default())
    }
}

lazy_static::lazy_static! {
    /// Global bridge logger
    static ref GLOBAL_LOGGER: Mutex<BridgeLogger> = Mutex::new(BridgeLogger::default());
}

/// Log an event to the global logger
pub fn log_event(event: BridgeEvent) {
    GLOBAL_LOGGER.lock().log(event);
}

/// Configure global logger
pub fn configure_logger(config: BridgeLoggerConfig) {
    *GLOBAL_LOGGER.lock() = BridgeLogger::new(config);
}

/// Get global logger event count
pub fn get_event_count() -> usize {
    GLOBAL_LOGGER.lock().event_count()
}

/// Last `n` events of the global logger, oldest first
pub fn recent_events(n: usize) -> Vec<BridgeEvent> {
    let logger = GLOBAL_LOGGER.lock();
    let events = logger.get_events();
    let skip = events.len().saturating_sub(n);
    events.into_iter().skip(skip).map(|(_, e)| e).collect()
}
