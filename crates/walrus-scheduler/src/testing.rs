//! In-memory container runtime for scheduler tests.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use walrus_core::{ContainerRuntime, ContainerSpec, ContainerState, Error, Result};

/// A recorded runtime operation: `(operation, subject)`.
pub(crate) type Event = (String, String);

/// Mock runtime that records operations in order and simulates container
/// execution with a configurable delay and per-container exit codes.
#[derive(Default)]
pub(crate) struct MockRuntime {
    images: Mutex<Vec<String>>,
    exit_codes: Mutex<HashMap<String, i64>>,
    states: Mutex<HashMap<String, ContainerState>>,
    events: Mutex<Vec<Event>>,
    run_delay: Duration,
    running: AtomicUsize,
    pub max_running: AtomicUsize,
}

impl MockRuntime {
    pub fn new() -> Self {
        Self {
            images: Mutex::new(vec!["busybox:latest".to_string()]),
            ..Default::default()
        }
    }

    pub fn with_exit_code(self, container: &str, code: i64) -> Self {
        self.exit_codes
            .lock()
            .unwrap()
            .insert(container.to_string(), code);
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.run_delay = delay;
        self
    }

    pub fn set_state(&self, container: &str, state: ContainerState) {
        self.states
            .lock()
            .unwrap()
            .insert(container.to_string(), state);
    }

    fn record(&self, op: &str, subject: &str) {
        self.events
            .lock()
            .unwrap()
            .push((op.to_string(), subject.to_string()));
    }

    pub fn has_event(&self, op: &str, subject: &str) -> bool {
        self.event_index(op, subject).is_some()
    }

    pub fn event_index(&self, op: &str, subject: &str) -> Option<usize> {
        self.events
            .lock()
            .unwrap()
            .iter()
            .position(|(o, s)| o == op && s == subject)
    }
}

#[async_trait]
impl ContainerRuntime for MockRuntime {
    async fn pull_image(&self, image: &str) -> Result<()> {
        self.record("pull", image);
        self.images.lock().unwrap().push(image.to_string());
        Ok(())
    }

    async fn list_images(&self) -> Result<Vec<String>> {
        Ok(self.images.lock().unwrap().clone())
    }

    async fn create_container(&self, spec: &ContainerSpec) -> Result<String> {
        self.record("create", &spec.name);
        Ok(spec.name.clone())
    }

    async fn start_container(&self, name: &str) -> Result<()> {
        self.record("start", name);
        Ok(())
    }

    async fn wait_container(&self, name: &str) -> Result<i64> {
        let in_flight = self.running.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_running.fetch_max(in_flight, Ordering::SeqCst);

        tokio::time::sleep(self.run_delay).await;

        self.running.fetch_sub(1, Ordering::SeqCst);
        let code = self
            .exit_codes
            .lock()
            .unwrap()
            .get(name)
            .copied()
            .unwrap_or(0);
        self.set_state(
            name,
            ContainerState {
                running: false,
                exit_code: Some(code),
                error: String::new(),
            },
        );
        self.record("wait", name);
        Ok(code)
    }

    async fn inspect_container(&self, name: &str) -> Result<ContainerState> {
        self.states
            .lock()
            .unwrap()
            .get(name)
            .cloned()
            .ok_or_else(|| Error::NotFound(name.to_string()))
    }

    async fn read_logs(&self, name: &str) -> Result<String> {
        Ok(format!("logs from {}\n", name))
    }

    async fn remove_container(&self, name: &str) -> Result<()> {
        self.record("remove", name);
        Ok(())
    }

    async fn kill_container(&self, name: &str) -> Result<()> {
        self.record("kill", name);
        Err(Error::NotRunning(name.to_string()))
    }

    async fn container_stats(&self, _name: &str) -> Result<Option<serde_json::Value>> {
        Ok(None)
    }
}
