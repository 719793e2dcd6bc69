//! The workflow callback bus (spec §4.3). Grounded on the
//! `callbacks/workflow_callbacks_manager.rs` / `noop_workflow_callbacks.rs`
//! shape in the reference implementation this system was derived from — the
//! teacher carries no callback bus of its own. Every event is also mirrored
//! to `tracing` so operational visibility does not depend on a listener being
//! registered.
use std::sync::Arc;

use serde_json::Value;
use tracing::{debug, error, info, warn};

/// Progress reported by a long-running stage.
#[derive(Debug, Clone, Default)]
pub struct Progress {
    pub percent: Option<f32>,
    pub description: Option<String>,
    pub total: Option<u64>,
    pub completed: Option<u64>,
}

/// One listener on the callback bus. Every method has a no-op default so
/// implementors only override what they need.
pub trait WorkflowCallbacks: Send + Sync {
    fn pipeline_start(&self, _workflow_names: &[String]) {}
    fn pipeline_end(&self, _results: &[String]) {}
    fn workflow_start(&self, _name: &str) {}
    fn workflow_end(&self, _name: &str) {}
    fn progress(&self, _progress: &Progress) {}
    fn error(&self, _msg: &str, _cause: Option<&str>, _stack: Option<&str>, _details: Option<&Value>) {}
    fn warning(&self, _msg: &str, _details: Option<&Value>) {}
    fn log(&self, _msg: &str, _details: Option<&Value>) {}
}

/// Fans every event out to every registered listener. Listeners must not
/// block the pipeline; `progress`/`log`/`warning` run on a spawned task so a
/// slow sink cannot stall stage execution, while the sequencing events
/// (`pipeline_*`/`workflow_*`) run inline since the runner depends on them
/// having been observed before moving on.
#[derive(Clone, Default)]
pub struct CallbackManager {
    listeners: Vec<Arc<dyn WorkflowCallbacks>>,
}

impl CallbackManager {
    pub fn new(listeners: Vec<Arc<dyn WorkflowCallbacks>>) -> Self {
        Self { listeners }
    }

    pub fn pipeline_start(&self, workflow_names: &[String]) {
        for listener in &self.listeners {
            listener.pipeline_start(workflow_names);
        }
    }

    pub fn pipeline_end(&self, results: &[String]) {
        for listener in &self.listeners {
            listener.pipeline_end(results);
        }
    }

    pub fn workflow_start(&self, name: &str) {
        for listener in &self.listeners {
            listener.workflow_start(name);
        }
    }

    pub fn workflow_end(&self, name: &str) {
        for listener in &self.listeners {
            listener.workflow_end(name);
        }
    }

    pub fn progress(&self, progress: Progress) {
        for listener in self.listeners.clone() {
            let progress = progress.clone();
            tokio::spawn(async move { listener.progress(&progress) });
        }
    }

    pub fn error(&self, msg: String, cause: Option<String>, stack: Option<String>, details: Option<Value>) {
        for listener in &self.listeners {
            listener.error(&msg, cause.as_deref(), stack.as_deref(), details.as_ref());
        }
    }

    pub fn warning(&self, msg: String, details: Option<Value>) {
        for listener in self.listeners.clone() {
            let msg = msg.clone();
            let details = details.clone();
            tokio::spawn(async move { listener.warning(&msg, details.as_ref()) });
        }
    }

    pub fn log(&self, msg: String, details: Option<Value>) {
        for listener in self.listeners.clone() {
            let msg = msg.clone();
            let details = details.clone();
            tokio::spawn(async move { listener.log(&msg, details.as_ref()) });
        }
    }
}

/// Mirrors every event into `tracing`. The default listener for a headless run.
pub struct ConsoleCallbacks;

impl WorkflowCallbacks for ConsoleCallbacks {
    fn pipeline_start(&self, workflow_names: &[String]) {
        info!(workflows = ?workflow_names, "pipeline starting");
    }

    fn pipeline_end(&self, results: &[String]) {
        info!(results = ?results, "pipeline finished");
    }

    fn workflow_start(&self, name: &str) {
        info!(workflow = name, "workflow starting");
    }

    fn workflow_end(&self, name: &str) {
        info!(workflow = name, "workflow finished");
    }

    fn progress(&self, progress: &Progress) {
        debug!(
            percent = progress.percent,
            completed = progress.completed,
            total = progress.total,
            description = progress.description.as_deref(),
            "progress"
        );
    }

    fn error(&self, msg: &str, cause: Option<&str>, stack: Option<&str>, details: Option<&Value>) {
        error!(cause, stack, ?details, "{msg}");
    }

    fn warning(&self, msg: &str, details: Option<&Value>) {
        warn!(?details, "{msg}");
    }

    fn log(&self, msg: &str, details: Option<&Value>) {
        debug!(?details, "{msg}");
    }
}
