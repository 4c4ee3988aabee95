// Centralized logging utilities to reduce verbose logging patterns
use log::{debug, info, warn};
use std::time::Duration;

pub struct LoggingHelper;

impl LoggingHelper {
    /// Log the start of a pipeline run
    pub fn log_pipeline_start(backend: &str, step_count: usize, start_index: usize) {
        debug!(
            "▶️  Running {} pipeline: {} step(s) from index {}",
            backend, step_count, start_index
        );
    }

    /// Log a single step about to run
    pub fn log_pipeline_step(address: &str, index: usize) {
        debug!("🔹 Pipeline step {} ({})", index, address);
    }

    /// Log a step short-circuiting the run
    pub fn log_pipeline_halted(address: &str, index: usize) {
        info!("⏸️  Pipeline halted by {} at index {}", address, index);
    }

    /// Log a pipeline that ran to the end
    pub fn log_pipeline_completed(backend: &str, last_index: usize) {
        debug!("✅ {} pipeline completed at index {}", backend, last_index);
    }

    /// Log a resumption from persisted partial state
    pub fn log_pipeline_resumed(backend: &str, next_index: usize) {
        info!("⏯️  Resuming {} pipeline at index {}", backend, next_index);
    }

    pub fn log_partial_pipeline_saved(backend: &str, next_index: usize) {
        debug!(
            "💾 Saved partial {} pipeline (resume at {})",
            backend, next_index
        );
    }

    pub fn log_partial_pipeline_cleared() {
        debug!("🧹 Cleared partial pipeline state");
    }

    /// Log an authenticate call addressed to another backend
    pub fn log_backend_not_applicable(backend: &str, requested: Option<&str>) {
        debug!(
            "⏭️  Backend {} skipped (request addressed to {:?})",
            backend, requested
        );
    }

    /// Log an allow-list rejection
    pub fn log_auth_denied(backend: &str, email: Option<&str>) {
        warn!(
            "🚫 {} authentication denied by allow-list for {:?}",
            backend, email
        );
    }

    /// Log the user resolved by an authentication pipeline
    pub fn log_user_resolved(backend: &str, is_new: bool) {
        if is_new {
            info!("👤 New user authenticated via {}", backend);
        } else {
            info!("👤 User authenticated via {}", backend);
        }
    }

    /// Log an outbound provider request
    pub fn log_http_request(method: &str, url: &str, timeout: Option<Duration>) {
        debug!("🌐 {} {} (timeout: {:?})", method, url, timeout);
    }

    /// Log a backend added to the registry
    pub fn log_backend_registered(name: &str) {
        info!("✅ Backend {} registered", name);
    }

    /// Log summary of registered pipeline steps
    pub fn log_step_registry_summary(addresses: &[&str]) {
        info!("🎯 Registered pipeline steps: {:?}", addresses);
    }
}
