//! Service Framework
//!
//! Background work (the rollup scheduler) runs as a [`Service`] started by a
//! [`ServiceManager`], which owns the shutdown broadcast and waits for every
//! service to stop within a timeout.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

// ============================================================================
// Service Trait
// ============================================================================

/// Long-running background task
#[async_trait::async_trait]
pub trait Service: Send + Sync {
    /// Run until `shutdown` fires
    async fn start(&self, shutdown: broadcast::Receiver<()>) -> Result<(), ServiceError>;

    /// Service name for logging and identification
    fn name(&self) -> &'static str;

    /// Current status
    fn status(&self) -> ServiceStatus;
}

// ============================================================================
// Service Status
// ============================================================================

/// Status of a service
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServiceStatus {
    /// Service is initializing
    Starting,

    /// Service is running normally
    Running,

    /// Service is shutting down
    Stopping,

    /// Service has stopped
    Stopped,

    /// Service failed with an error
    Failed(String),
}

impl ServiceStatus {
    /// Check if the service is in a healthy state
    pub fn is_healthy(&self) -> bool {
        matches!(self, ServiceStatus::Running)
    }

    /// Check if the service has stopped (normally or due to failure)
    pub fn is_stopped(&self) -> bool {
        matches!(self, ServiceStatus::Stopped | ServiceStatus::Failed(_))
    }
}

// ============================================================================
// Service Error
// ============================================================================

/// Errors that can occur in services
#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    /// Attempted to register or start a service twice
    #[error("Service already running")]
    AlreadyRunning,
}

// ============================================================================
// Service Manager
// ============================================================================

struct ServiceHandle {
    service: Arc<dyn Service>,
    task: Option<JoinHandle<Result<(), ServiceError>>>,
}

/// Starts registered services and stops them on shutdown
pub struct ServiceManager {
    shutdown_timeout: Duration,
    services: RwLock<HashMap<&'static str, ServiceHandle>>,
    shutdown_tx: broadcast::Sender<()>,
}

impl ServiceManager {
    /// Create a manager that waits up to `shutdown_timeout` for services to stop
    pub fn new(shutdown_timeout: Duration) -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);
        Self {
            shutdown_timeout,
            services: RwLock::new(HashMap::new()),
            shutdown_tx,
        }
    }

    /// Register a service with the manager
    pub fn register(&self, service: Arc<dyn Service>) -> Result<(), ServiceError> {
        let name = service.name();
        let mut services = self.services.write();
        if services.contains_key(name) {
            return Err(ServiceError::AlreadyRunning);
        }
        services.insert(
            name,
            ServiceHandle {
                service,
                task: None,
            },
        );
        tracing::debug!(service = name, "Service registered");
        Ok(())
    }

    /// Spawn every registered service that is not already running
    pub fn start_all(&self) {
        let mut services = self.services.write();
        for (name, handle) in services.iter_mut() {
            if handle.task.is_some() {
                continue;
            }
            let service = handle.service.clone();
            let shutdown_rx = self.shutdown_tx.subscribe();
            handle.task = Some(tokio::spawn(async move { service.start(shutdown_rx).await }));
            tracing::debug!(service = *name, "Service started");
        }
    }

    /// Signal shutdown and wait for every service task
    pub async fn shutdown(&self) {
        tracing::info!("Initiating graceful shutdown");
        let _ = self.shutdown_tx.send(());

        let tasks: Vec<(&'static str, JoinHandle<Result<(), ServiceError>>)> = {
            let mut services = self.services.write();
            services
                .iter_mut()
                .filter_map(|(name, handle)| handle.task.take().map(|task| (*name, task)))
                .collect()
        };

        let deadline = tokio::time::Instant::now() + self.shutdown_timeout;
        for (name, task) in tasks {
            let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
            match tokio::time::timeout(remaining, task).await {
                Ok(Ok(Ok(()))) => {
                    tracing::debug!(service = name, "Service stopped gracefully");
                },
                Ok(Ok(Err(e))) => {
                    tracing::warn!(service = name, error = %e, "Service stopped with error");
                },
                Ok(Err(e)) => {
                    tracing::error!(service = name, error = %e, "Service task panicked");
                },
                Err(_) => {
                    tracing::warn!(service = name, "Service shutdown timed out");
                },
            }
        }
        tracing::info!("Shutdown complete");
    }

    /// Status of every registered service
    pub fn status(&self) -> HashMap<&'static str, ServiceStatus> {
        self.services
            .read()
            .iter()
            .map(|(name, handle)| (*name, handle.service.status()))
            .collect()
    }

    /// Status of one service
    pub fn service_status(&self, name: &str) -> Option<ServiceStatus> {
        self.services.read().get(name).map(|h| h.service.status())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct IdleService {
        status: RwLock<ServiceStatus>,
    }

    #[async_trait::async_trait]
    impl Service for IdleService {
        async fn start(&self, mut shutdown: broadcast::Receiver<()>) -> Result<(), ServiceError> {
            *self.status.write() = ServiceStatus::Running;
            let _ = shutdown.recv().await;
            *self.status.write() = ServiceStatus::Stopped;
            Ok(())
        }

        fn name(&self) -> &'static str {
            "idle"
        }

        fn status(&self) -> ServiceStatus {
            self.status.read().clone()
        }
    }

    #[test]
    fn test_status_helpers() {
        assert!(ServiceStatus::Running.is_healthy());
        assert!(!ServiceStatus::Starting.is_healthy());
        assert!(ServiceStatus::Failed("x".into()).is_stopped());
    }

    #[tokio::test]
    async fn test_register_start_shutdown() {
        let manager = ServiceManager::new(Duration::from_secs(1));
        let service = Arc::new(IdleService {
            status: RwLock::new(ServiceStatus::Starting),
        });
        manager.register(service.clone()).unwrap();
        assert!(matches!(
            manager.register(service.clone()),
            Err(ServiceError::AlreadyRunning)
        ));

        manager.start_all();
        for _ in 0..100 {
            if service.status().is_healthy() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert_eq!(manager.service_status("idle"), Some(ServiceStatus::Running));

        manager.shutdown().await;
        assert_eq!(service.status(), ServiceStatus::Stopped);
    }
}
