//! Subscriber setup plus an in-memory record of recovered failures.
//!
//! [`init`] installs a `fmt` subscriber filtered by `RUST_LOG` or the
//! configured level, with a [`WarningCollector`] layer that keeps the most
//! recent `WARN` and `ERROR` events so a front end can summarize them.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Instant;

use parking_lot::Mutex;
use spritenav_config::LoggingConfig;
use tracing::field::{Field, Visit};
use tracing::{Event, Level, Subscriber};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::Layer;
use tracing_subscriber::layer::{Context, SubscriberExt};
use tracing_subscriber::util::SubscriberInitExt;

/// Events kept by [`init`]'s collector.
pub const DEFAULT_WARNING_CAPACITY: usize = 256;

/// A captured warning or error.
#[derive(Debug, Clone)]
pub struct CapturedEvent {
    /// Seconds since the collector was created.
    pub elapsed_secs: f64,
    pub level: Level,
    pub target: String,
    pub message: String,
}

#[derive(Debug)]
struct EventBuffer {
    events: VecDeque<CapturedEvent>,
    capacity: usize,
    dropped: usize,
    started: Instant,
}

impl EventBuffer {
    fn push(&mut self, level: Level, target: String, message: String) {
        if self.events.len() >= self.capacity {
            self.events.pop_front();
            self.dropped += 1;
        }
        self.events.push_back(CapturedEvent {
            elapsed_secs: self.started.elapsed().as_secs_f64(),
            level,
            target,
            message,
        });
    }
}

/// `tracing` layer keeping the newest `WARN`/`ERROR` events in a bounded
/// buffer.
#[derive(Debug, Clone)]
pub struct WarningCollector {
    buffer: Arc<Mutex<EventBuffer>>,
}

impl WarningCollector {
    pub fn new(capacity: usize) -> Self {
        Self {
            buffer: Arc::new(Mutex::new(EventBuffer {
                events: VecDeque::with_capacity(capacity.min(DEFAULT_WARNING_CAPACITY)),
                capacity: capacity.max(1),
                dropped: 0,
                started: Instant::now(),
            })),
        }
    }

    pub fn reader(&self) -> WarningReader {
        WarningReader {
            buffer: Arc::clone(&self.buffer),
        }
    }
}

impl<S: Subscriber> Layer<S> for WarningCollector {
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        let metadata = event.metadata();
        let level = *metadata.level();
        if level > Level::WARN {
            return;
        }
        let mut visitor = MessageVisitor::default();
        event.record(&mut visitor);
        self.buffer
            .lock()
            .push(level, metadata.target().to_string(), visitor.finish());
    }
}

/// Read handle for a [`WarningCollector`].
#[derive(Debug, Clone)]
pub struct WarningReader {
    buffer: Arc<Mutex<EventBuffer>>,
}

impl WarningReader {
    pub fn events(&self) -> Vec<CapturedEvent> {
        self.buffer.lock().events.iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.buffer.lock().events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Events pushed out of the buffer by newer ones.
    pub fn dropped(&self) -> usize {
        self.buffer.lock().dropped
    }
}

/// Collects the `message` field and any structured fields as `key=value`.
#[derive(Default)]
struct MessageVisitor {
    message: String,
    fields: Vec<String>,
}

impl MessageVisitor {
    fn finish(self) -> String {
        if self.fields.is_empty() {
            self.message
        } else {
            format!("{} {}", self.message, self.fields.join(" "))
        }
    }
}

impl Visit for MessageVisitor {
    fn record_debug(&mut self, field: &Field, value: &dyn std::fmt::Debug) {
        if field.name() == "message" {
            self.message = format!("{value:?}");
        } else {
            self.fields.push(format!("{}={value:?}", field.name()));
        }
    }

    fn record_str(&mut self, field: &Field, value: &str) {
        if field.name() == "message" {
            self.message = value.to_string();
        } else {
            self.fields.push(format!("{}={value}", field.name()));
        }
    }
}

/// Filter directive for a configured level raised by `-v` flags.
pub fn level_for(config: &LoggingConfig, verbosity: u8) -> String {
    match verbosity {
        0 => config.level.clone(),
        1 => "debug".to_string(),
        _ => "trace".to_string(),
    }
}

/// `RUST_LOG` when set and valid, else `directive`, else `info`.
pub fn env_filter(directive: &str) -> EnvFilter {
    EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(directive))
        .unwrap_or_else(|_| EnvFilter::new("info"))
}

/// Install the global subscriber. Returns a reader over captured warnings.
///
/// Returns `None` when a global subscriber is already installed.
pub fn init(config: &LoggingConfig, verbosity: u8) -> Option<WarningReader> {
    let collector = WarningCollector::new(DEFAULT_WARNING_CAPACITY);
    let reader = collector.reader();
    tracing_subscriber::registry()
        .with(env_filter(&level_for(config, verbosity)))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(collector)
        .try_init()
        .ok()
        .map(|()| reader)
}
