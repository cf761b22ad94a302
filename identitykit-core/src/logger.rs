//! Forwarding of library log output to embedder-provided sinks.
//!
//! The library itself only emits `tracing` events. An embedder decides where
//! they go by building one [`LogDispatcher`] at process start, registering one
//! or more [`Logger`] sinks on it and either installing it as the global
//! subscriber ([`LogDispatcher::install`]) or composing its
//! [`LogDispatcher::layer`] into a subscriber of its own.

use std::{
    fmt,
    panic::{catch_unwind, AssertUnwindSafe},
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc, PoisonError, RwLock,
    },
};

use thiserror::Error;
use tracing::{
    field::{Field, Visit},
    Event, Subscriber,
};
use tracing_subscriber::{layer::Context, prelude::*, EnvFilter, Layer};

/// A sink that receives formatted log messages.
///
/// Implemented by the embedding app (natively or, with the `ffi` feature,
/// from Kotlin/Swift).
///
/// # Examples
///
/// ```rust
/// use identitykit_core::logger::{LogLevel, Logger};
///
/// struct StderrLogger;
///
/// impl Logger for StderrLogger {
///     fn log(&self, level: LogLevel, message: String) {
///         eprintln!("[{level:?}] {message}");
///     }
/// }
/// ```
#[cfg_attr(feature = "ffi", uniffi::export(with_foreign))]
pub trait Logger: Sync + Send {
    /// Logs a message at the specified log level.
    fn log(&self, level: LogLevel, message: String);
}

/// Severity of a log message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[cfg_attr(feature = "ffi", derive(uniffi::Enum))]
pub enum LogLevel {
    /// Very low priority, often extremely detailed messages.
    Trace,
    /// Lower priority debugging information.
    Debug,
    /// Informational messages that highlight progress.
    Info,
    /// Potentially harmful situations.
    Warn,
    /// Errors that might still allow the caller to continue.
    Error,
}

impl From<tracing::Level> for LogLevel {
    fn from(level: tracing::Level) -> Self {
        match level {
            tracing::Level::ERROR => Self::Error,
            tracing::Level::WARN => Self::Warn,
            tracing::Level::INFO => Self::Info,
            tracing::Level::DEBUG => Self::Debug,
            tracing::Level::TRACE => Self::Trace,
        }
    }
}

/// Errors raised while installing the dispatcher as the global subscriber.
#[derive(Debug, Error)]
pub enum LoggerError {
    /// The filter directives did not parse.
    #[error("invalid log filter: {0}")]
    InvalidFilter(String),
    /// A global subscriber or `log` bridge was already installed.
    #[error("logger already installed: {0}")]
    AlreadyInstalled(String),
}

/// Fans log messages out to every registered [`Logger`].
///
/// Dispatch is best-effort: a sink that panics is skipped and counted, the
/// remaining sinks still receive the message and the caller never observes
/// the failure.
#[derive(Default)]
pub struct LogDispatcher {
    sinks: RwLock<Vec<Arc<dyn Logger>>>,
    dropped: AtomicU64,
}

impl LogDispatcher {
    /// Creates a dispatcher with no sinks.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a dispatcher with a single sink.
    #[must_use]
    pub fn with_sink(sink: Arc<dyn Logger>) -> Self {
        let dispatcher = Self::new();
        dispatcher.add_sink(sink);
        dispatcher
    }

    /// Registers an additional sink.
    pub fn add_sink(&self, sink: Arc<dyn Logger>) {
        self.sinks
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(sink);
    }

    /// Delivers `message` to every sink.
    pub fn dispatch(&self, level: LogLevel, message: &str) {
        let sinks = self
            .sinks
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        for sink in sinks {
            let delivered =
                catch_unwind(AssertUnwindSafe(|| sink.log(level, message.to_string())));
            if delivered.is_err() {
                self.dropped.fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    /// Number of deliveries abandoned because a sink panicked.
    #[must_use]
    pub fn dropped_messages(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// A `tracing` layer that forwards events to this dispatcher.
    #[must_use]
    pub fn layer(self: &Arc<Self>) -> DispatchLayer {
        DispatchLayer {
            dispatcher: Arc::clone(self),
        }
    }

    /// Installs this dispatcher as the process-wide `tracing` subscriber and
    /// bridges records from the `log` crate into it.
    ///
    /// `directives` uses the `EnvFilter` syntax, e.g. `"identitykit_core=debug,info"`.
    ///
    /// # Errors
    ///
    /// Returns an error if the directives are invalid or a subscriber was
    /// already installed.
    pub fn install(self: &Arc<Self>, directives: &str) -> Result<(), LoggerError> {
        let filter = EnvFilter::try_new(directives)
            .map_err(|err| LoggerError::InvalidFilter(err.to_string()))?;
        let subscriber = tracing_subscriber::registry()
            .with(filter)
            .with(self.layer());
        tracing::subscriber::set_global_default(subscriber)
            .map_err(|err| LoggerError::AlreadyInstalled(err.to_string()))?;
        tracing_log::LogTracer::init()
            .map_err(|err| LoggerError::AlreadyInstalled(err.to_string()))
    }
}

impl fmt::Debug for LogDispatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let sinks = self.sinks.read().unwrap_or_else(PoisonError::into_inner).len();
        f.debug_struct("LogDispatcher")
            .field("sinks", &sinks)
            .field("dropped", &self.dropped_messages())
            .finish()
    }
}

/// `tracing` layer produced by [`LogDispatcher::layer`].
///
/// Debug and trace events are only forwarded when they originate from this
/// crate, so dependency chatter never reaches the embedder's sinks.
pub struct DispatchLayer {
    dispatcher: Arc<LogDispatcher>,
}

impl<S: Subscriber> Layer<S> for DispatchLayer {
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        let metadata = event.metadata();
        let level = LogLevel::from(*metadata.level());
        let from_identitykit = metadata.target().starts_with("identitykit");
        if level <= LogLevel::Debug && !from_identitykit {
            return;
        }

        let mut visitor = MessageVisitor::default();
        event.record(&mut visitor);
        self.dispatcher.dispatch(level, &visitor.finish());
    }
}

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
    fn record_str(&mut self, field: &Field, value: &str) {
        if field.name() == "message" {
            self.message = value.to_string();
        } else {
            self.fields.push(format!("{}={value}", field.name()));
        }
    }

    fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
        if field.name() == "message" {
            self.message = format!("{value:?}");
        } else {
            self.fields.push(format!("{}={value:?}", field.name()));
        }
    }
}
