// Error Reporter Port
//
// Sink for failures that must stay observable without aborting the caller
// (callback handlers, deferred after-response work).

use tracing::error;

pub trait ErrorReporter: Send + Sync {
    fn report(&self, context: &str, error: &anyhow::Error);
}

/// Emits each report as an `error!` event
pub struct TracingErrorReporter;

impl ErrorReporter for TracingErrorReporter {
    fn report(&self, context: &str, error: &anyhow::Error) {
        error!(context = %context, error = %format!("{error:#}"), "Reported error");
    }
}

pub mod mocks {
    use super::*;
    use std::sync::Mutex;

    /// Keeps every report for assertions
    #[derive(Default)]
    pub struct RecordingErrorReporter {
        reports: Mutex<Vec<(String, String)>>,
    }

    impl RecordingErrorReporter {
        pub fn new() -> Self {
            Self::default()
        }

        /// `(context, message)` pairs in report order
        pub fn reports(&self) -> Vec<(String, String)> {
            self.reports.lock().unwrap().clone()
        }

        pub fn count(&self) -> usize {
            self.reports.lock().unwrap().len()
        }
    }

    impl ErrorReporter for RecordingErrorReporter {
        fn report(&self, context: &str, error: &anyhow::Error) {
            self.reports
                .lock()
                .unwrap()
                .push((context.to_string(), format!("{error:#}")));
        }
    }
}
