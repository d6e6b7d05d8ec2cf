//! Operation log sink.
//!
//! Callers may supply a `(label, fields)` sink that receives a summary of
//! every backend write before it is sent. The sink is best effort: a
//! panicking sink is caught and reported through `log::warn!`, never failing
//! the surrounding operation.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

pub type LogFields = Vec<(String, String)>;
pub type LogSink = dyn Fn(&str, &LogFields) + Send + Sync;

#[derive(Clone, Default)]
pub struct OpLog {
    sink: Option<Arc<LogSink>>,
}

impl OpLog {
    pub fn disabled() -> Self {
        OpLog { sink: None }
    }

    pub fn new(sink: Arc<LogSink>) -> Self {
        OpLog { sink: Some(sink) }
    }

    pub fn write(&self, label: &str, fields: LogFields) {
        if let Some(sink) = &self.sink {
            let result = catch_unwind(AssertUnwindSafe(|| sink(label, &fields)));
            if result.is_err() {
                log::warn!("operation log sink panicked on {label:?}");
            }
        }
    }
}

impl std::fmt::Debug for OpLog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpLog").field("enabled", &self.sink.is_some()).finish()
    }
}
