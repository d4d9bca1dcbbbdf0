//! Job execution timing and structured logging. The teacher exports these
//! metrics to OpenTelemetry; this core has no metrics backend to ship to, so
//! `JobTimer` just logs start/success/failure through `tracing` at the same
//! call sites, keeping the worker loop's instrumentation shape unchanged.

use std::time::Instant;

pub struct JobTimer {
    job_type: String,
    start: Instant,
}

impl JobTimer {
    pub fn start(job_type: &str) -> Self {
        tracing::info!(job_type, "job started");
        Self { job_type: job_type.to_string(), start: Instant::now() }
    }

    pub fn success(self) {
        let duration = self.start.elapsed().as_secs_f64();
        tracing::info!(job_type = %self.job_type, duration_seconds = duration, "job completed successfully");
    }

    pub fn failure(self, error: &str) {
        let duration = self.start.elapsed().as_secs_f64();
        tracing::error!(job_type = %self.job_type, duration_seconds = duration, error, "job failed");
    }

    pub fn elapsed(&self) -> f64 {
        self.start.elapsed().as_secs_f64()
    }
}
