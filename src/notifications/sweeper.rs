use super::NotificationRegistry;
use crate::logging::log_info;
use crate::shutdown::ShutdownCoordinator;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};

/// Periodically drops completed notifications that have been shown long enough
pub struct NotificationSweeper {
    registry: NotificationRegistry,
    shutdown: ShutdownCoordinator,
}

impl NotificationSweeper {
    pub fn new(registry: NotificationRegistry, shutdown: ShutdownCoordinator) -> Self {
        Self { registry, shutdown }
    }

    pub fn start(self) -> JoinHandle<()> {
        let mut shutdown_rx = self.shutdown.subscribe();
        let registry = self.registry;
        let shutdown = self.shutdown;

        tokio::spawn(async move {
            if shutdown.is_shutdown() {
                return;
            }

            let mut ticker = interval(registry.config().sweep_interval());
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        registry.sweep();
                    }
                    _ = shutdown_rx.recv() => {
                        log_info("notifications", "Notification sweeper gracefully shutting down")
                            .unwrap_or_default();
                        break;
                    }
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RegistryConfig;
    use crate::notifications::{NewNotification, NotificationPatch, NotificationStatus};
    use std::time::Duration;
    use tokio::time::timeout;

    #[tokio::test]
    async fn test_sweeper_removes_completed_rows() {
        let registry = NotificationRegistry::new(RegistryConfig {
            sweep_after_secs: 0,
            sweep_grace_ms: 0,
            sweep_interval_ms: 10,
            ..RegistryConfig::default()
        });
        let shutdown = ShutdownCoordinator::new();

        let done = registry.add_notification(NewNotification::new("done", NotificationStatus::Uploading));
        registry.add_notification(NewNotification::new("busy", NotificationStatus::Uploading));
        registry.update_notification(&done, NotificationPatch::completed());

        let handle = NotificationSweeper::new(registry.clone(), shutdown.clone()).start();

        let mut revisions = registry.watch_revision();
        timeout(
            Duration::from_secs(2),
            revisions.wait_for(|_| registry.get(&done).is_none()),
        )
        .await
        .expect("sweeper did not run")
        .unwrap();

        assert_eq!(registry.len(), 1);

        shutdown.shutdown();
        timeout(Duration::from_secs(1), handle).await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_sweeper_exits_if_already_shut_down() {
        let shutdown = ShutdownCoordinator::new();
        shutdown.shutdown();

        let handle = NotificationSweeper::new(NotificationRegistry::default(), shutdown).start();
        timeout(Duration::from_secs(1), handle).await.unwrap().unwrap();
    }
}
