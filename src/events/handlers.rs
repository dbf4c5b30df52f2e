use super::{EventBus, EventReceiver, Toast, UploadEvent};
use crate::logging::{log_info, log_warn, log_with_details};
use crate::shutdown::ShutdownCoordinator;
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

/// Renders toasts; implemented by the UI layer
pub trait ToastSink: Send + Sync {
    fn show(&self, toast: Toast);
}

impl<F> ToastSink for F
where
    F: Fn(Toast) + Send + Sync,
{
    fn show(&self, toast: Toast) {
        self(toast)
    }
}

/// Runs `on_event` for every bus event until the bus closes or shutdown is signalled
fn spawn_event_loop<F>(
    name: &'static str,
    mut rx: EventReceiver,
    shutdown: ShutdownCoordinator,
    mut on_event: F,
) -> JoinHandle<()>
where
    F: FnMut(UploadEvent) + Send + 'static,
{
    let mut shutdown_rx = shutdown.subscribe();

    tokio::spawn(async move {
        if shutdown.is_shutdown() {
            return;
        }

        loop {
            tokio::select! {
                result = rx.recv() => {
                    match result {
                        Ok(event) => on_event(event),
                        Err(broadcast::error::RecvError::Closed) => {
                            log_info("events", &format!("{} stopped (event bus closed)", name))
                                .unwrap_or_default();
                            break;
                        }
                        Err(broadcast::error::RecvError::Lagged(n)) => {
                            log_warn("events", &format!("{} lagged {} events", name, n))
                                .unwrap_or_default();
                        }
                    }
                }
                _ = shutdown_rx.recv() => {
                    log_info("events", &format!("{} gracefully shutting down", name))
                        .unwrap_or_default();
                    break;
                }
            }
        }
    })
}

/// Handler that turns upload events into toasts for the frontend
pub struct ToastForwarder {
    event_bus: EventBus,
    sink: Arc<dyn ToastSink>,
    shutdown: ShutdownCoordinator,
}

impl ToastForwarder {
    pub fn new(event_bus: EventBus, sink: Arc<dyn ToastSink>, shutdown: ShutdownCoordinator) -> Self {
        Self {
            event_bus,
            sink,
            shutdown,
        }
    }

    pub fn start(self) -> JoinHandle<()> {
        // Subscribe before spawning so nothing published after start() is missed
        let rx = self.event_bus.subscribe();
        let sink = self.sink;

        spawn_event_loop("Toast forwarder", rx, self.shutdown, move |event| {
            sink.show(event.to_toast());
        })
    }
}

/// Handler that records every upload event in the `upload-events` activity log
pub struct ActivityLogHandler {
    event_bus: EventBus,
    shutdown: ShutdownCoordinator,
}

impl ActivityLogHandler {
    pub fn new(event_bus: EventBus, shutdown: ShutdownCoordinator) -> Self {
        Self {
            event_bus,
            shutdown,
        }
    }

    pub fn start(self) -> JoinHandle<()> {
        let rx = self.event_bus.subscribe();

        spawn_event_loop("Activity log handler", rx, self.shutdown, |event| {
            let details = serde_json::to_value(&event).unwrap_or_default();
            log_with_details(
                "upload-events",
                "INFO",
                &format!("{} ({})", event.payload_type(), event.title),
                details,
            )
            .unwrap_or_default();
        })
    }
}
