//! Console capture.
//!
//! Host log output arrives through [`ConsoleLayer`], a `tracing_subscriber`
//! layer the host composes into its subscriber. Installing the source also
//! chains a panic hook so panics are recorded as `error` console events.

use crate::emitter::Emitter;
use crate::storage::lock;
use recordroom_types::{ConsoleLevel, ConsolePayload, EventPayload};
use serde_json::Value;
use std::backtrace::{Backtrace, BacktraceStatus};
use std::cell::Cell;
use std::fmt::Debug;
use std::panic::{self, PanicHookInfo};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tracing::field::{Field, Visit};
use tracing::{Event, Level, Subscriber};
use tracing_subscriber::layer::{Context, Layer};

type PanicHook = Box<dyn Fn(&PanicHookInfo<'_>) + Send + Sync + 'static>;

/// Crates whose log output is never captured: our own, plus the transport
/// and HTTP stack the recorder itself drives.
const IGNORED_TARGETS: &[&str] = &[
    "tokio_tungstenite",
    "tungstenite",
    "hyper",
    "hyper_util",
    "reqwest",
    "h2",
    "rustls",
    "tokio",
    "mio",
];

thread_local! {
    /// Set while this thread is inside a capture callback.
    static CAPTURING: Cell<bool> = const { Cell::new(false) };
}

/// Run `f` unless this thread is already capturing.
fn guarded(f: impl FnOnce()) {
    if CAPTURING.with(|c| c.replace(true)) {
        return;
    }
    f();
    CAPTURING.with(|c| c.set(false));
}

struct ConsoleInner {
    emitter: Emitter,
    armed: AtomicBool,
    previous_hook: Mutex<Option<Arc<PanicHook>>>,
}

impl ConsoleInner {
    fn record(&self, level: ConsoleLevel, message: String, stack: Option<String>) {
        if !self.armed.load(Ordering::Acquire) {
            return;
        }
        self.emitter.emit(EventPayload::Console(ConsolePayload {
            level,
            message,
            stack,
        }));
    }

    fn record_panic(&self, info: &PanicHookInfo<'_>) {
        let message = panic_message(info);
        let mut stack = info
            .location()
            .map(|loc| format!("at {}:{}:{}", loc.file(), loc.line(), loc.column()));

        let backtrace = Backtrace::capture();
        if backtrace.status() == BacktraceStatus::Captured {
            let trace = backtrace.to_string();
            stack = Some(match stack {
                Some(location) => format!("{}\n{}", location, trace),
                None => trace,
            });
        }

        self.record(ConsoleLevel::Error, message, stack);
    }
}

fn panic_message(info: &PanicHookInfo<'_>) -> String {
    let payload = info.payload();
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "panic".to_string()
    }
}

/// Console capture source.
#[derive(Clone)]
pub struct ConsoleCapture {
    inner: Arc<ConsoleInner>,
}

impl ConsoleCapture {
    pub fn new(emitter: Emitter) -> Self {
        Self {
            inner: Arc::new(ConsoleInner {
                emitter,
                armed: AtomicBool::new(false),
                previous_hook: Mutex::new(None),
            }),
        }
    }

    pub fn is_installed(&self) -> bool {
        self.inner.armed.load(Ordering::Acquire)
    }

    /// Arm the source and chain the panic hook in front of the current one.
    pub fn install(&self) {
        if self.inner.armed.swap(true, Ordering::AcqRel) {
            return;
        }

        let previous: Arc<PanicHook> = Arc::new(panic::take_hook());
        *lock(&self.inner.previous_hook) = Some(previous.clone());

        let weak = Arc::downgrade(&self.inner);
        panic::set_hook(Box::new(move |info| {
            if let Some(inner) = weak.upgrade() {
                guarded(|| inner.record_panic(info));
            }
            (*previous)(info);
        }));
    }

    /// Disarm the source and put the previous panic hook back.
    ///
    /// Assumes nothing installed another hook on top of ours in the meantime.
    pub fn uninstall(&self) {
        if !self.inner.armed.swap(false, Ordering::AcqRel) {
            return;
        }

        let Some(previous) = lock(&self.inner.previous_hook).take() else {
            return;
        };
        // Dropping our hook releases its handle on `previous`.
        drop(panic::take_hook());
        match Arc::try_unwrap(previous) {
            Ok(hook) => panic::set_hook(hook),
            Err(shared) => panic::set_hook(Box::new(move |info| (*shared)(info))),
        }
    }

    /// Record one console line.
    pub fn record(&self, level: ConsoleLevel, message: impl Into<String>) {
        self.inner.record(level, message.into(), None);
    }

    /// Record a console call with several arguments: strings verbatim,
    /// everything else as JSON, joined by spaces.
    pub fn record_args(&self, level: ConsoleLevel, args: &[Value]) {
        let message = args
            .iter()
            .map(|arg| match arg {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            })
            .collect::<Vec<_>>()
            .join(" ");
        self.inner.record(level, message, None);
    }

    /// A layer feeding `tracing` events into this source.
    pub fn layer(&self) -> ConsoleLayer {
        ConsoleLayer {
            capture: self.clone(),
        }
    }
}

/// `tracing` layer that records host log events as console events.
///
/// INFO maps to `log`, WARN to `warn`, ERROR to `error`. DEBUG and TRACE are
/// not captured. Inert while the console source is not installed.
#[derive(Clone)]
pub struct ConsoleLayer {
    capture: ConsoleCapture,
}

impl ConsoleLayer {
    fn is_ignored(target: &str) -> bool {
        let root = target.split("::").next().unwrap_or(target);
        root.starts_with("recordroom") || IGNORED_TARGETS.contains(&root)
    }
}

impl<S: Subscriber> Layer<S> for ConsoleLayer {
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        if !self.capture.is_installed() {
            return;
        }

        let metadata = event.metadata();
        let level = match *metadata.level() {
            Level::ERROR => ConsoleLevel::Error,
            Level::WARN => ConsoleLevel::Warn,
            Level::INFO => ConsoleLevel::Log,
            _ => return,
        };
        if Self::is_ignored(metadata.target()) {
            return;
        }

        let mut visitor = MessageVisitor::default();
        event.record(&mut visitor);
        guarded(|| self.capture.inner.record(level, visitor.finish(), None));
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
            return self.message;
        }
        let fields = self.fields.join(" ");
        if self.message.is_empty() {
            fields
        } else {
            format!("{} {}", self.message, fields)
        }
    }
}

impl Visit for MessageVisitor {
    fn record_str(&mut self, field: &Field, value: &str) {
        if field.name() == "message" {
            self.message = value.to_string();
        } else {
            self.fields.push(format!("{}={}", field.name(), value));
        }
    }

    fn record_debug(&mut self, field: &Field, value: &dyn Debug) {
        if field.name() == "message" {
            self.message = format!("{:?}", value);
        } else {
            self.fields.push(format!("{}={:?}", field.name(), value));
        }
    }
}
