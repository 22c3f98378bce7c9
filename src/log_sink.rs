//! Line-oriented build log sinks
//!
//! Every line the build runner prints and every orchestration message flows
//! through a [`LogSink`]. Sinks are infallible: a sink that cannot deliver a
//! line drops it.

use std::sync::{Arc, Mutex};

/// Receiver for one line of build output or orchestration status
pub trait LogSink: Send + Sync {
    fn line(&self, line: &str);
}

impl<F> LogSink for F
where
    F: Fn(&str) + Send + Sync,
{
    fn line(&self, line: &str) {
        self(line)
    }
}

/// Forwards lines to `tracing` under the `forgebuild::build_log` target
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingLogSink;

impl LogSink for TracingLogSink {
    fn line(&self, line: &str) {
        tracing::info!(target: "forgebuild::build_log", "{}", line);
    }
}

/// Collects lines in memory
#[derive(Debug, Default, Clone)]
pub struct BufferingLogSink {
    lines: Arc<Mutex<Vec<String>>>,
}

impl BufferingLogSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn lines(&self) -> Vec<String> {
        match self.lines.lock() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    /// Number of buffered lines containing `needle`
    pub fn count_containing(&self, needle: &str) -> usize {
        self.lines().iter().filter(|l| l.contains(needle)).count()
    }

    pub fn contains(&self, needle: &str) -> bool {
        self.count_containing(needle) > 0
    }

    pub fn clear(&self) {
        if let Ok(mut guard) = self.lines.lock() {
            guard.clear();
        }
    }
}

impl LogSink for BufferingLogSink {
    fn line(&self, line: &str) {
        let mut guard = match self.lines.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        guard.push(line.to_string());
    }
}

/// Prefixes every line with `[profile] `
pub struct ProfileLogSink<'a> {
    profile: &'a str,
    inner: &'a dyn LogSink,
}

impl<'a> ProfileLogSink<'a> {
    pub fn new(profile: &'a str, inner: &'a dyn LogSink) -> Self {
        Self { profile, inner }
    }
}

impl LogSink for ProfileLogSink<'_> {
    fn line(&self, line: &str) {
        self.inner.line(&format!("[{}] {}", self.profile, line));
    }
}

/// Sends each line to several sinks in order
#[derive(Clone, Default)]
pub struct FanoutLogSink {
    sinks: Vec<Arc<dyn LogSink>>,
}

impl FanoutLogSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, sink: Arc<dyn LogSink>) -> Self {
        self.sinks.push(sink);
        self
    }
}

impl LogSink for FanoutLogSink {
    fn line(&self, line: &str) {
        for sink in &self.sinks {
            sink.line(line);
        }
    }
}
