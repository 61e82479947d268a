use std::time::{Duration, Instant};

use tracing::{trace, warn, Level};
use tracing_subscriber::fmt::time::SystemTime;
use tracing_subscriber::{fmt, prelude::*, EnvFilter, Registry};

/// Initialize production logging with configurable settings
pub fn init_logging(level: Level, json_output: bool) {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("ringcache={},warn", level)));

    if json_output {
        // JSON format for production environments
        let fmt_layer = fmt::layer()
            .json()
            .with_timer(SystemTime)
            .with_target(true)
            .with_file(true)
            .with_line_number(true)
            .with_thread_ids(true)
            .with_thread_names(true);

        Registry::default().with(env_filter).with(fmt_layer).init();
    } else {
        // Human-readable format for development
        let fmt_layer = fmt::layer()
            .with_timer(SystemTime)
            .with_target(true)
            .with_file(true)
            .with_line_number(true)
            .with_thread_ids(false)
            .with_thread_names(true);

        Registry::default().with(env_filter).with(fmt_layer).init();
    }
}

/// Operations slower than this get a warning instead of a trace line.
const SLOW_OP: Duration = Duration::from_millis(100);

/// Wall-clock timer for one cache operation. Records on drop, so a
/// `let _timer = ...` binding at the top of an operation covers every
/// exit path.
pub struct OperationTimer {
    started: Instant,
    operation: &'static str,
    key: Option<String>,
}

impl OperationTimer {
    pub fn new(operation: &'static str) -> Self {
        Self {
            started: Instant::now(),
            operation,
            key: None,
        }
    }

    pub fn with_key(operation: &'static str, key: &str) -> Self {
        Self {
            started: Instant::now(),
            operation,
            key: Some(key.to_string()),
        }
    }
}

impl Drop for OperationTimer {
    fn drop(&mut self) {
        let elapsed = self.started.elapsed();
        if elapsed >= SLOW_OP {
            warn!(
                operation = self.operation,
                key = self.key.as_deref().unwrap_or(""),
                elapsed_ms = elapsed.as_millis() as u64,
                "slow cache operation"
            );
        } else {
            trace!(
                operation = self.operation,
                key = self.key.as_deref().unwrap_or(""),
                elapsed_us = elapsed.as_micros() as u64,
                "operation finished"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timer_records_on_drop() {
        let timer = OperationTimer::with_key("get", "user:1");
        drop(timer);
    }

    #[test]
    fn test_timer_crossing_slow_threshold() {
        let timer = OperationTimer::new("set");
        std::thread::sleep(SLOW_OP + Duration::from_millis(20));
        drop(timer);
    }
}
