// Deferred work run once the triggering request has completed

use crate::error::Result;
use crate::port::ErrorReporter;
use futures::future::BoxFuture;
use std::future::Future;
use std::sync::Mutex;
use tracing::debug;

/// Cooperative post-response hooks, drained by `Dispatcher::terminate`
#[derive(Default)]
pub struct AfterResponseHooks {
    hooks: Mutex<Vec<BoxFuture<'static, Result<()>>>>,
}

impl AfterResponseHooks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn defer<F>(&self, hook: F)
    where
        F: Future<Output = Result<()>> + Send + 'static,
    {
        if let Ok(mut hooks) = self.hooks.lock() {
            hooks.push(Box::pin(hook));
        }
    }

    pub fn pending(&self) -> usize {
        self.hooks.lock().map(|hooks| hooks.len()).unwrap_or(0)
    }

    /// Run every deferred hook in order
    ///
    /// Each failure is reported; the first one is returned after all hooks ran.
    pub async fn run(&self, reporter: &dyn ErrorReporter) -> Result<()> {
        let hooks = match self.hooks.lock() {
            Ok(mut hooks) => std::mem::take(&mut *hooks),
            Err(_) => Vec::new(),
        };
        debug!(count = hooks.len(), "Running after-response hooks");

        let mut first_error = None;
        for hook in hooks {
            if let Err(e) = hook.await {
                reporter.report("after-response hook", &anyhow::anyhow!(e.to_string()));
                first_error.get_or_insert(e);
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::AppError;
    use crate::port::error_reporter::mocks::RecordingErrorReporter;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[tokio::test]
    async fn test_hooks_run_once_and_report_failures() {
        let hooks = AfterResponseHooks::new();
        let reporter = RecordingErrorReporter::new();
        let ran = Arc::new(AtomicUsize::new(0));

        let counter = Arc::clone(&ran);
        hooks.defer(async move {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });
        hooks.defer(async { Err(AppError::Queue("down".to_string())) });
        let counter = Arc::clone(&ran);
        hooks.defer(async move {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });
        assert_eq!(hooks.pending(), 3);

        let err = hooks.run(&reporter).await.unwrap_err();
        assert!(matches!(err, AppError::Queue(_)));
        assert_eq!(ran.load(Ordering::SeqCst), 2);
        assert_eq!(reporter.count(), 1);

        hooks.run(&reporter).await.unwrap();
        assert_eq!(ran.load(Ordering::SeqCst), 2);
    }
}
