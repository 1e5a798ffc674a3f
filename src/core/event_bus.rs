// src/core/event_bus.rs
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::thread::JoinHandle;
use std::time::Duration;

use anyhow::Result;
use crossbeam::channel::{Receiver, RecvTimeoutError, Sender, unbounded};
use tokio::sync::broadcast;

use super::events::{Event, EventPriority, EventType};
use super::lock::{lock_mutex, lock_rwlock_read, lock_rwlock_write};
use super::logging::{ComponentLogger, LogContext};

const RECV_TIMEOUT: Duration = Duration::from_millis(50);

pub trait EventHandler: Send + Sync {
    fn handle_event(&self, event: &Event) -> Result<()>;
    fn name(&self) -> &str;
    fn priority_filter(&self) -> Option<EventPriority> {
        None
    }
    fn event_type_filter(&self) -> Option<Vec<EventType>> {
        None
    }
}

type Handlers = Arc<RwLock<Vec<Arc<dyn EventHandler>>>>;

/// Fan-out of status notifications on a dedicated dispatch thread, so
/// publishers (capture loop, API handlers) never block on slow consumers.
pub struct EventBus {
    name: String,
    event_tx: Sender<Event>,
    event_rx: Receiver<Event>,
    handlers: Handlers,
    running: Arc<AtomicBool>,
    thread_handle: Mutex<Option<JoinHandle<()>>>,
    event_count: Arc<AtomicU64>,
}

impl EventBus {
    pub fn new(name: &str) -> Self {
        let (tx, rx) = unbounded();

        let bus = Self {
            name: name.to_string(),
            event_tx: tx,
            event_rx: rx,
            handlers: Arc::new(RwLock::new(Vec::new())),
            running: Arc::new(AtomicBool::new(false)),
            thread_handle: Mutex::new(None),
            event_count: Arc::new(AtomicU64::new(0)),
        };

        bus.debug(&format!("EventBus '{}' created", name));
        bus
    }

    pub fn start(&self) -> Result<()> {
        if self.running.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        let event_rx = self.event_rx.clone();
        let handlers = self.handlers.clone();
        let running = self.running.clone();
        let name = self.name.clone();

        let handle = std::thread::Builder::new()
            .name(format!("event-bus-{}", self.name))
            .spawn(move || processing_loop(event_rx, handlers, running, name))?;

        *lock_mutex(&self.thread_handle, "EventBus::start") = Some(handle);
        self.info("EventBus started");
        Ok(())
    }

    pub fn stop(&self) -> Result<()> {
        if !self.running.swap(false, Ordering::SeqCst) {
            return Ok(());
        }

        let handle = lock_mutex(&self.thread_handle, "EventBus::stop").take();
        if let Some(handle) = handle {
            if handle.join().is_err() {
                self.error("EventBus thread panicked");
            }
        }

        self.info("EventBus stopped");
        Ok(())
    }

    pub fn publish(&self, event: Event) -> Result<()> {
        self.event_count.fetch_add(1, Ordering::Relaxed);
        self.debug(&event.format_message());

        if let Err(e) = self.event_tx.send(event) {
            anyhow::bail!("Failed to publish event: {}", e);
        }
        Ok(())
    }

    /// Publishing for fire-and-forget call sites: failures are logged.
    pub fn emit(&self, event: Event) {
        if let Err(e) = self.publish(event) {
            self.warn(&e.to_string());
        }
    }

    pub fn register_handler(&self, handler: Arc<dyn EventHandler>) {
        let mut handlers = lock_rwlock_write(&self.handlers, "EventBus::register_handler");
        handlers.push(handler.clone());

        self.debug(&format!(
            "Registered event handler '{}' (total: {})",
            handler.name(),
            handlers.len()
        ));
    }

    pub fn unregister_handler(&self, handler_name: &str) -> Result<()> {
        let mut handlers = lock_rwlock_write(&self.handlers, "EventBus::unregister_handler");
        let initial_len = handlers.len();
        handlers.retain(|h| h.name() != handler_name);

        if handlers.len() < initial_len {
            Ok(())
        } else {
            anyhow::bail!("Handler '{}' not found", handler_name)
        }
    }

    pub fn event_count(&self) -> u64 {
        self.event_count.load(Ordering::Relaxed)
    }

    pub fn handler_list(&self) -> Vec<String> {
        lock_rwlock_read(&self.handlers, "EventBus::handler_list")
            .iter()
            .map(|h| h.name().to_string())
            .collect()
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Relaxed)
    }
}

impl Drop for EventBus {
    fn drop(&mut self) {
        let _ = self.stop();
    }
}

impl ComponentLogger for EventBus {
    fn log_context(&self) -> LogContext {
        LogContext::new("EventBus", &self.name)
    }
}

fn processing_loop(
    event_rx: Receiver<Event>,
    handlers: Handlers,
    running: Arc<AtomicBool>,
    name: String,
) {
    let logger = EventBusLogger { name };
    logger.debug("processing thread started");

    while running.load(Ordering::Relaxed) {
        match event_rx.recv_timeout(RECV_TIMEOUT) {
            Ok(event) => dispatch(&handlers, &event, &logger),
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => {
                logger.error("Event channel disconnected");
                break;
            }
        }
    }

    // deliver what was queued before the stop request
    for event in event_rx.try_iter() {
        dispatch(&handlers, &event, &logger);
    }

    logger.debug("processing thread stopped");
}

fn dispatch(handlers: &Handlers, event: &Event, logger: &EventBusLogger) {
    let handlers = lock_rwlock_read(handlers, "EventBus::dispatch");

    for handler in handlers.iter() {
        if let Some(min_priority) = handler.priority_filter() {
            if event.priority < min_priority {
                continue;
            }
        }

        if let Some(allowed) = handler.event_type_filter() {
            if !allowed.contains(&event.event_type) {
                continue;
            }
        }

        if let Err(e) = handler.handle_event(event) {
            logger.error(&format!(
                "Handler '{}' failed to process event {}: {}",
                handler.name(),
                event.id,
                e
            ));
        }
    }
}

struct EventBusLogger {
    name: String,
}

impl ComponentLogger for EventBusLogger {
    fn log_context(&self) -> LogContext {
        LogContext::new("EventBus", &self.name)
    }
}

/// Writes events into the log
pub struct EventLoggerHandler {
    name: String,
    min_priority: EventPriority,
}

impl EventLoggerHandler {
    pub fn new(name: &str, min_priority: EventPriority) -> Self {
        Self {
            name: name.to_string(),
            min_priority,
        }
    }
}

impl EventHandler for EventLoggerHandler {
    fn handle_event(&self, event: &Event) -> Result<()> {
        let log_message = format!(
            "[event_id={}][type={:?}] {}",
            event.id,
            event.event_type,
            event.payload_str()
        );

        match event.priority {
            EventPriority::Debug => log::debug!("{}", log_message),
            EventPriority::Info => log::info!("{}", log_message),
            EventPriority::Warning => log::warn!("{}", log_message),
            EventPriority::Error => log::error!("{}", log_message),
            EventPriority::Critical => log::error!("CRITICAL: {}", log_message),
        }

        Ok(())
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn priority_filter(&self) -> Option<EventPriority> {
        Some(self.min_priority)
    }
}

/// Forwards events into a tokio broadcast channel (SSE stream, GUI bridge).
pub struct EventBroadcastHandler {
    name: String,
    tx: broadcast::Sender<Event>,
}

impl EventBroadcastHandler {
    pub fn new(name: &str, capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self {
            name: name.to_string(),
            tx,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.tx.subscribe()
    }
}

impl EventHandler for EventBroadcastHandler {
    fn handle_event(&self, event: &Event) -> Result<()> {
        // no subscribers is not an error
        let _ = self.tx.send(event.clone());
        Ok(())
    }

    fn name(&self) -> &str {
        &self.name
    }
}
