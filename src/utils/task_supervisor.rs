use std::collections::HashMap;

use tokio::task::JoinHandle;
use tracing::{info, warn};

/// Tracks the service's long-lived background tasks (flush loop, status
/// probe, retention trigger, api server) so unexpected terminations are
/// noticed and shutdown can unwind them all.
pub struct TaskSupervisor {
    tasks: HashMap<String, JoinHandle<()>>,
}

impl TaskSupervisor {
    pub fn new() -> Self {
        TaskSupervisor {
            tasks: HashMap::new(),
        }
    }

    pub fn spawn<F>(&mut self, name: impl Into<String>, future: F)
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        let name = name.into();
        info!(task = %name, "spawning background task");
        self.tasks.insert(name, tokio::spawn(future));
    }

    /// Remove and report tasks that terminated on their own.
    pub fn reap_finished(&mut self) -> Vec<String> {
        let finished: Vec<String> = self
            .tasks
            .iter()
            .filter(|(_, handle)| handle.is_finished())
            .map(|(name, _)| name.clone())
            .collect();
        for name in &finished {
            warn!(task = %name, "background task terminated unexpectedly");
            self.tasks.remove(name);
        }
        finished
    }

    pub fn active_count(&self) -> usize {
        self.tasks.len()
    }

    pub fn shutdown_all(&mut self) {
        info!(count = self.tasks.len(), "stopping background tasks");
        for (_, handle) in self.tasks.drain() {
            handle.abort();
        }
    }
}

impl Default for TaskSupervisor {
    fn default() -> Self {
        Self::new()
    }
}
