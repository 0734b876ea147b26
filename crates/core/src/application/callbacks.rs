// Callback Handlers and Registry
//
// Stored callbacks name a handler; the registry maps names to code in the
// current process.

use crate::application::batch::Batch;
use crate::domain::Callback;
use async_trait::async_trait;
use futures::future::BoxFuture;
use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, RwLock};

/// Prefix of generated handler names for inline closures
const CLOSURE_PREFIX: &str = "closure:";

/// What a handler receives when its callback fires
#[derive(Clone)]
pub struct CallbackInvocation {
    /// Fresh batch snapshot (absent for chain-catch callbacks)
    pub batch: Option<Batch>,
    /// Failure that triggered the callback, if any
    pub error: Option<String>,
    /// Arguments stored with the callback reference
    pub args: serde_json::Value,
}

#[async_trait]
pub trait CallbackHandler: Send + Sync {
    async fn handle(&self, invocation: CallbackInvocation) -> anyhow::Result<()>;
}

type BoxedHandlerFn =
    Box<dyn Fn(CallbackInvocation) -> BoxFuture<'static, anyhow::Result<()>> + Send + Sync>;

/// Adapts an async closure into a handler
pub struct ClosureHandler {
    f: BoxedHandlerFn,
}

impl ClosureHandler {
    pub fn new<F, Fut>(f: F) -> Self
    where
        F: Fn(CallbackInvocation) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        Self {
            f: Box::new(move |invocation| Box::pin(f(invocation))),
        }
    }
}

#[async_trait]
impl CallbackHandler for ClosureHandler {
    async fn handle(&self, invocation: CallbackInvocation) -> anyhow::Result<()> {
        (self.f)(invocation).await
    }
}

/// Name → handler map shared by everything that fires callbacks
#[derive(Default)]
pub struct CallbackRegistry {
    handlers: RwLock<HashMap<String, Arc<dyn CallbackHandler>>>,
}

impl CallbackRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register (or replace) a named handler
    pub fn register(&self, name: impl Into<String>, handler: Arc<dyn CallbackHandler>) {
        if let Ok(mut handlers) = self.handlers.write() {
            handlers.insert(name.into(), handler);
        }
    }

    pub fn register_fn<F, Fut>(&self, name: impl Into<String>, f: F)
    where
        F: Fn(CallbackInvocation) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        self.register(name, Arc::new(ClosureHandler::new(f)));
    }

    /// Register an inline closure under a generated name
    ///
    /// The returned reference only resolves inside this process.
    pub fn register_closure<F, Fut>(&self, f: F) -> Callback
    where
        F: Fn(CallbackInvocation) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        let name = format!("{CLOSURE_PREFIX}{}", uuid::Uuid::new_v4());
        self.register_fn(name.clone(), f);
        Callback::handler(name)
    }

    pub fn resolve(&self, name: &str) -> Option<Arc<dyn CallbackHandler>> {
        self.handlers
            .read()
            .ok()
            .and_then(|handlers| handlers.get(name).cloned())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.resolve(name).is_some()
    }
}
