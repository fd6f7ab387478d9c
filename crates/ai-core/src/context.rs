//! Per-call request context.
//!
//! One [`RequestContext`] exists per top-level call. Clones are handles to
//! the same object: hooks mutate it in place and recursive continuations
//! reuse it, so the request id stays stable across the whole logical call.
//!
//! # Connections
//!
//! - Created by the [`RuntimeExecutor`](crate::executor::RuntimeExecutor).
//! - The [`PluginEngine`](crate::engine::PluginEngine) attaches a
//!   [`ContinuationHandler`] and records lifecycle state on it.
//! - Stream transforms call [`RequestContext::recursive_call`] to continue
//!   the conversation after running tools.

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};
use serde_json::Value;

use crate::errors::{AiCoreError, RecursiveCallError};
use crate::models::{LifecycleState, ModelRef, OperationKind, ToolSet};
use crate::params::{CallParams, CallResult};

/// A request to run the same operation again with new parameters.
#[derive(Debug, Clone)]
pub struct ContinuationRequest {
    pub params: CallParams,
    /// 1 for the first continuation of the logical call, 2 for the second, ...
    pub depth: usize,
}

/// Re-enters the engine on behalf of a context.
pub trait ContinuationHandler: Send + Sync {
    fn continue_call<'a>(
        &'a self,
        ctx: &'a RequestContext,
        request: ContinuationRequest,
    ) -> Pin<Box<dyn Future<Output = Result<CallResult, AiCoreError>> + Send + 'a>>;
}

struct ContextInner {
    request_id: String,
    provider_id: String,
    model: ModelRef,
    started_at: DateTime<Utc>,
    original_params: Mutex<CallParams>,
    metadata: Mutex<HashMap<String, Value>>,
    is_recursive_call: AtomicBool,
    active_tools: Mutex<Option<ToolSet>>,
    operation: Mutex<Option<OperationKind>>,
    state: Mutex<LifecycleState>,
    continuation_handler: Mutex<Option<Arc<dyn ContinuationHandler>>>,
    continuations: AtomicUsize,
}

/// Shared state of one logical call.
#[derive(Clone)]
pub struct RequestContext {
    inner: Arc<ContextInner>,
}

impl RequestContext {
    /// Create a context with a fresh UUID v4 request id.
    pub fn new(provider_id: impl Into<String>, model: ModelRef, params: CallParams) -> Self {
        Self {
            inner: Arc::new(ContextInner {
                request_id: uuid::Uuid::new_v4().to_string(),
                provider_id: provider_id.into(),
                model,
                started_at: Utc::now(),
                original_params: Mutex::new(params),
                metadata: Mutex::new(HashMap::new()),
                is_recursive_call: AtomicBool::new(false),
                active_tools: Mutex::new(None),
                operation: Mutex::new(None),
                state: Mutex::new(LifecycleState::Created),
                continuation_handler: Mutex::new(None),
                continuations: AtomicUsize::new(0),
            }),
        }
    }

    pub fn request_id(&self) -> &str {
        &self.inner.request_id
    }

    pub fn provider_id(&self) -> &str {
        &self.inner.provider_id
    }

    pub fn model(&self) -> &ModelRef {
        &self.inner.model
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.inner.started_at
    }

    /// Parameters of the call currently running on this context.
    ///
    /// During a recursive continuation these are the continuation's
    /// parameters.
    pub fn original_params(&self) -> CallParams {
        lock(&self.inner.original_params).clone()
    }

    /// Swap the original parameters, returning the previous ones.
    pub fn replace_original_params(&self, params: CallParams) -> CallParams {
        std::mem::replace(&mut *lock(&self.inner.original_params), params)
    }

    // -- metadata --

    pub fn metadata(&self, key: &str) -> Option<Value> {
        lock(&self.inner.metadata).get(key).cloned()
    }

    pub fn set_metadata(&self, key: impl Into<String>, value: Value) {
        lock(&self.inner.metadata).insert(key.into(), value);
    }

    pub fn remove_metadata(&self, key: &str) -> Option<Value> {
        lock(&self.inner.metadata).remove(key)
    }

    /// Snapshot of every metadata entry.
    pub fn metadata_snapshot(&self) -> HashMap<String, Value> {
        lock(&self.inner.metadata).clone()
    }

    // -- flags and state --

    pub fn is_recursive_call(&self) -> bool {
        self.inner.is_recursive_call.load(Ordering::SeqCst)
    }

    /// Set the recursion flag, returning the previous value.
    pub fn set_recursive_call(&self, value: bool) -> bool {
        self.inner.is_recursive_call.swap(value, Ordering::SeqCst)
    }

    pub fn active_tools(&self) -> Option<ToolSet> {
        lock(&self.inner.active_tools).clone()
    }

    pub fn set_active_tools(&self, tools: Option<ToolSet>) {
        *lock(&self.inner.active_tools) = tools;
    }

    /// Operation being run, once an engine picked the context up.
    pub fn operation(&self) -> Option<OperationKind> {
        *lock(&self.inner.operation)
    }

    pub fn set_operation(&self, operation: OperationKind) {
        *lock(&self.inner.operation) = Some(operation);
    }

    pub fn state(&self) -> LifecycleState {
        *lock(&self.inner.state)
    }

    pub fn set_state(&self, state: LifecycleState) {
        *lock(&self.inner.state) = state;
    }

    /// Number of continuations issued so far by this logical call.
    pub fn continuation_count(&self) -> usize {
        self.inner.continuations.load(Ordering::SeqCst)
    }

    // -- recursion --

    /// Install the engine entry point used by [`recursive_call`](Self::recursive_call).
    pub fn attach_continuation_handler(&self, handler: Arc<dyn ContinuationHandler>) {
        *lock(&self.inner.continuation_handler) = Some(handler);
    }

    pub fn has_continuation_handler(&self) -> bool {
        lock(&self.inner.continuation_handler).is_some()
    }

    /// Run the same operation again on this context with `params`.
    ///
    /// Errors are reported as [`RecursiveCallError`]: a depth violation
    /// as `DepthExceeded`, any other failure of the nested call as `Failed`.
    pub async fn recursive_call(&self, params: CallParams) -> Result<CallResult, RecursiveCallError> {
        let handler = lock(&self.inner.continuation_handler)
            .clone()
            .ok_or(RecursiveCallError::Unavailable)?;
        let depth = self.inner.continuations.fetch_add(1, Ordering::SeqCst) + 1;

        handler
            .continue_call(self, ContinuationRequest { params, depth })
            .await
            .map_err(|err| match err {
                AiCoreError::RecursiveCall(inner) => inner,
                other => RecursiveCallError::Failed {
                    message: other.to_string(),
                },
            })
    }
}

impl fmt::Debug for RequestContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RequestContext")
            .field("request_id", &self.inner.request_id)
            .field("provider_id", &self.inner.provider_id)
            .field("model", &self.inner.model.model_id())
            .field("state", &self.state())
            .field("is_recursive_call", &self.is_recursive_call())
            .finish()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
