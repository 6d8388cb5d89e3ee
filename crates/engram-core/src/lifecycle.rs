//! Service registry and lifecycle fabric.
//!
//! Services declare a name and their dependencies; the registry computes a
//! topological start order at initialization (cycles are fatal), starts in
//! order, and stops in reverse under a shared deadline. User shutdown hooks
//! run LIFO before any service stops. Readiness requires every service
//! healthy and drops the moment shutdown begins.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde::Serialize;

use crate::error::{EngramError, Result};

// ============================================================================
// SERVICE TRAIT
// ============================================================================

/// A managed service. All phases default to no-ops so thin adapters only
/// implement what they need.
#[async_trait]
pub trait Service: Send + Sync {
    fn name(&self) -> &'static str;

    /// Names of services that must initialize and start before this one.
    fn requires(&self) -> Vec<&'static str> {
        Vec::new()
    }

    async fn initialize(&self) -> Result<()> {
        Ok(())
    }

    async fn start(&self) -> Result<()> {
        Ok(())
    }

    async fn stop(&self) -> Result<()> {
        Ok(())
    }

    async fn health_check(&self) -> Result<()> {
        Ok(())
    }
}

/// Health probe outcome for one service.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthStatus {
    pub healthy: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

// ============================================================================
// REGISTRY
// ============================================================================

type ShutdownHook = Box<dyn FnOnce() + Send>;

pub struct ServiceRegistry {
    services: Vec<Arc<dyn Service>>,
    by_name: HashMap<&'static str, usize>,
    /// Topological start order; fixed at initialize, immutable after.
    order: Vec<usize>,
    hooks: Mutex<Vec<ShutdownHook>>,
    ready: AtomicBool,
}

impl ServiceRegistry {
    pub fn new() -> Self {
        Self {
            services: Vec::new(),
            by_name: HashMap::new(),
            order: Vec::new(),
            hooks: Mutex::new(Vec::new()),
            ready: AtomicBool::new(false),
        }
    }

    /// Register a service. Duplicate names fail.
    pub fn register(&mut self, service: Arc<dyn Service>) -> Result<()> {
        let name = service.name();
        if self.by_name.contains_key(name) {
            return Err(EngramError::InvalidInput(format!(
                "service {name:?} registered twice"
            )));
        }
        self.by_name.insert(name, self.services.len());
        self.services.push(service);
        Ok(())
    }

    /// Register a hook to run (LIFO) before service stops begin.
    pub fn on_shutdown(&self, hook: impl FnOnce() + Send + 'static) {
        self.hooks
            .lock()
            .expect("shutdown hooks poisoned")
            .push(Box::new(hook));
    }

    /// Compute the dependency order and initialize every service in it.
    /// Cycles and unknown dependencies fail fatally.
    pub async fn initialize_all(&mut self) -> Result<()> {
        self.order = self.topological_order()?;
        for &idx in &self.order {
            let service = &self.services[idx];
            tracing::debug!(service = service.name(), "initializing");
            service.initialize().await.map_err(|err| {
                tracing::error!(service = service.name(), error = %err, "initialize failed");
                err
            })?;
        }
        Ok(())
    }

    /// Start services in dependency order and mark the registry ready.
    pub async fn start_all(&self) -> Result<()> {
        for &idx in &self.order {
            let service = &self.services[idx];
            tracing::info!(service = service.name(), "starting");
            service.start().await.map_err(|err| {
                tracing::error!(service = service.name(), error = %err, "start failed");
                err
            })?;
        }
        self.ready.store(true, Ordering::SeqCst);
        Ok(())
    }

    /// Reverse-order shutdown. Readiness drops first, hooks run LIFO, then
    /// each stop gets whatever remains of the shared deadline; failures are
    /// logged, never aborting the sequence.
    pub async fn shutdown(&self, deadline: Duration) {
        self.ready.store(false, Ordering::SeqCst);

        let hooks: Vec<ShutdownHook> = {
            let mut hooks = self.hooks.lock().expect("shutdown hooks poisoned");
            hooks.drain(..).rev().collect()
        };
        for hook in hooks {
            hook();
        }

        let stop_by = Instant::now() + deadline;
        for &idx in self.order.iter().rev() {
            let service = &self.services[idx];
            let remaining = stop_by.saturating_duration_since(Instant::now());
            tracing::info!(service = service.name(), "stopping");
            match tokio::time::timeout(remaining, service.stop()).await {
                Ok(Ok(())) => {}
                Ok(Err(err)) => {
                    tracing::error!(service = service.name(), error = %err, "stop failed");
                }
                Err(_) => {
                    tracing::error!(service = service.name(), "stop ran past the shared deadline");
                }
            }
        }
    }

    /// Probe every service.
    pub async fn health_check_all(&self) -> HashMap<String, HealthStatus> {
        let mut statuses = HashMap::with_capacity(self.services.len());
        for service in &self.services {
            let status = match service.health_check().await {
                Ok(()) => HealthStatus {
                    healthy: true,
                    detail: None,
                },
                Err(err) => HealthStatus {
                    healthy: false,
                    detail: Some(err.to_string()),
                },
            };
            statuses.insert(service.name().to_string(), status);
        }
        statuses
    }

    /// Ready means started, not shutting down, and every service healthy.
    pub async fn is_ready(&self) -> bool {
        if !self.ready.load(Ordering::SeqCst) {
            return false;
        }
        self.health_check_all()
            .await
            .values()
            .all(|status| status.healthy)
    }

    /// Names in start order, for diagnostics.
    pub fn start_order(&self) -> Vec<&'static str> {
        self.order
            .iter()
            .map(|&idx| self.services[idx].name())
            .collect()
    }

    /// Kahn's algorithm; among ready nodes, registration order wins so the
    /// result is deterministic.
    fn topological_order(&self) -> Result<Vec<usize>> {
        let n = self.services.len();
        let mut dependents: Vec<Vec<usize>> = vec![Vec::new(); n];
        let mut indegree = vec![0_usize; n];

        for (idx, service) in self.services.iter().enumerate() {
            for dep in service.requires() {
                let &dep_idx = self.by_name.get(dep).ok_or_else(|| {
                    EngramError::InvalidInput(format!(
                        "service {:?} requires unknown service {dep:?}",
                        service.name()
                    ))
                })?;
                dependents[dep_idx].push(idx);
                indegree[idx] += 1;
            }
        }

        let mut queue: Vec<usize> = (0..n).filter(|&i| indegree[i] == 0).collect();
        let mut order = Vec::with_capacity(n);
        while let Some(&next) = queue.iter().min() {
            queue.retain(|&i| i != next);
            order.push(next);
            for &dependent in &dependents[next] {
                indegree[dependent] -= 1;
                if indegree[dependent] == 0 {
                    queue.push(dependent);
                }
            }
        }

        if order.len() != n {
            let stuck: Vec<&str> = (0..n)
                .filter(|&i| indegree[i] > 0)
                .map(|i| self.services[i].name())
                .collect();
            return Err(EngramError::Internal(format!(
                "dependency cycle among services: {stuck:?}"
            )));
        }
        Ok(order)
    }
}

impl Default for ServiceRegistry {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    struct Recorder {
        name: &'static str,
        requires: Vec<&'static str>,
        log: Arc<Mutex<Vec<String>>>,
        healthy: AtomicBool,
    }

    impl Recorder {
        fn new(
            name: &'static str,
            requires: Vec<&'static str>,
            log: Arc<Mutex<Vec<String>>>,
        ) -> Arc<Self> {
            Arc::new(Self {
                name,
                requires,
                log,
                healthy: AtomicBool::new(true),
            })
        }

        fn record(&self, phase: &str) {
            self.log
                .lock()
                .unwrap()
                .push(format!("{}:{}", phase, self.name));
        }
    }

    #[async_trait]
    impl Service for Recorder {
        fn name(&self) -> &'static str {
            self.name
        }

        fn requires(&self) -> Vec<&'static str> {
            self.requires.clone()
        }

        async fn initialize(&self) -> Result<()> {
            self.record("init");
            Ok(())
        }

        async fn start(&self) -> Result<()> {
            self.record("start");
            Ok(())
        }

        async fn stop(&self) -> Result<()> {
            self.record("stop");
            Ok(())
        }

        async fn health_check(&self) -> Result<()> {
            if self.healthy.load(Ordering::SeqCst) {
                Ok(())
            } else {
                Err(EngramError::BackendUnavailable("probe failed".to_string()))
            }
        }
    }

    fn stack() -> (ServiceRegistry, Arc<Mutex<Vec<String>>>) {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut registry = ServiceRegistry::new();
        // Registered out of dependency order on purpose.
        registry
            .register(Recorder::new("journal", vec!["embedding", "index"], Arc::clone(&log)))
            .unwrap();
        registry.register(Recorder::new("embedding", vec![], Arc::clone(&log))).unwrap();
        registry
            .register(Recorder::new("pipeline", vec!["consolidation"], Arc::clone(&log)))
            .unwrap();
        registry.register(Recorder::new("index", vec![], Arc::clone(&log))).unwrap();
        registry
            .register(Recorder::new("consolidation", vec!["journal"], Arc::clone(&log)))
            .unwrap();
        (registry, log)
    }

    #[tokio::test]
    async fn start_respects_dependencies_and_stop_reverses() {
        let (mut registry, log) = stack();
        registry.initialize_all().await.unwrap();
        registry.start_all().await.unwrap();
        registry.shutdown(Duration::from_secs(1)).await;

        let log = log.lock().unwrap().clone();
        let position = |phase: &str, name: &str| {
            log.iter()
                .position(|item| item == &format!("{phase}:{name}"))
                .unwrap()
        };

        // Dependencies initialize and start first.
        assert!(position("start", "embedding") < position("start", "journal"));
        assert!(position("start", "index") < position("start", "journal"));
        assert!(position("start", "journal") < position("start", "consolidation"));
        assert!(position("start", "consolidation") < position("start", "pipeline"));

        // Stop order is the exact reverse of start order.
        let starts: Vec<&String> = log.iter().filter(|l| l.starts_with("start:")).collect();
        let stops: Vec<String> = log
            .iter()
            .filter(|l| l.starts_with("stop:"))
            .map(|l| l.replace("stop:", "start:"))
            .collect();
        let reversed: Vec<String> = stops.into_iter().rev().collect();
        assert_eq!(starts.iter().map(|s| s.as_str()).collect::<Vec<_>>(),
            reversed.iter().map(|s| s.as_str()).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn duplicate_names_fail_registration() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut registry = ServiceRegistry::new();
        registry.register(Recorder::new("journal", vec![], Arc::clone(&log))).unwrap();
        let err = registry
            .register(Recorder::new("journal", vec![], log))
            .unwrap_err();
        assert_eq!(err.kind(), "invalid_input");
    }

    #[tokio::test]
    async fn cycles_are_fatal_at_init() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut registry = ServiceRegistry::new();
        registry.register(Recorder::new("a", vec!["b"], Arc::clone(&log))).unwrap();
        registry.register(Recorder::new("b", vec!["a"], log)).unwrap();
        let err = registry.initialize_all().await.unwrap_err();
        assert_eq!(err.kind(), "internal");
    }

    #[tokio::test]
    async fn unknown_dependency_is_invalid() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut registry = ServiceRegistry::new();
        registry.register(Recorder::new("a", vec!["ghost"], log)).unwrap();
        let err = registry.initialize_all().await.unwrap_err();
        assert_eq!(err.kind(), "invalid_input");
    }

    #[tokio::test]
    async fn readiness_requires_all_healthy_and_drops_on_shutdown() {
        let (mut registry, _log) = stack();
        registry.initialize_all().await.unwrap();
        assert!(!registry.is_ready().await); // not started yet
        registry.start_all().await.unwrap();
        assert!(registry.is_ready().await);

        let statuses = registry.health_check_all().await;
        assert_eq!(statuses.len(), 5);
        assert!(statuses.values().all(|s| s.healthy));

        registry.shutdown(Duration::from_secs(1)).await;
        assert!(!registry.is_ready().await);
    }

    #[tokio::test]
    async fn one_unhealthy_service_blocks_readiness() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut registry = ServiceRegistry::new();
        let flaky = Recorder::new("flaky", vec![], Arc::clone(&log));
        registry.register(Arc::clone(&flaky) as Arc<dyn Service>).unwrap();
        registry.initialize_all().await.unwrap();
        registry.start_all().await.unwrap();
        assert!(registry.is_ready().await);

        flaky.healthy.store(false, Ordering::SeqCst);
        assert!(!registry.is_ready().await);
        let statuses = registry.health_check_all().await;
        assert!(!statuses["flaky"].healthy);
        assert!(statuses["flaky"].detail.is_some());
    }

    #[tokio::test]
    async fn hooks_run_lifo_before_stops() {
        let (mut registry, log) = stack();
        registry.initialize_all().await.unwrap();
        registry.start_all().await.unwrap();

        {
            let log = Arc::clone(&log);
            registry.on_shutdown(move || log.lock().unwrap().push("hook:first".to_string()));
        }
        {
            let log = Arc::clone(&log);
            registry.on_shutdown(move || log.lock().unwrap().push("hook:second".to_string()));
        }

        registry.shutdown(Duration::from_secs(1)).await;
        let log = log.lock().unwrap().clone();
        let second = log.iter().position(|l| l == "hook:second").unwrap();
        let first = log.iter().position(|l| l == "hook:first").unwrap();
        let first_stop = log.iter().position(|l| l.starts_with("stop:")).unwrap();
        assert!(second < first);
        assert!(first < first_stop);
    }
}
