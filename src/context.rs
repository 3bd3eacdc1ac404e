//! Execution context threaded through plugin hooks and job attempts.
//!
//! A [`JobContext`] bundles the caller's cancellation signal with a set of
//! annotations that plugins attach as the context moves through the hook
//! chain. Each step consumes a context and hands back a new one, so a hook
//! never observes a context another hook is still working on.

use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::error::ContextError;

/// Typed name for an annotation stored in a [`JobContext`].
pub struct AnnotationKey<T> {
    name: &'static str,
    _marker: PhantomData<fn() -> T>,
}

impl<T> AnnotationKey<T> {
    pub const fn new(name: &'static str) -> Self {
        Self {
            name,
            _marker: PhantomData,
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }
}

impl<T> Clone for AnnotationKey<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for AnnotationKey<T> {}

impl<T> fmt::Debug for AnnotationKey<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("AnnotationKey").field(&self.name).finish()
    }
}

#[derive(Clone)]
struct Annotation {
    value: Arc<dyn Any + Send + Sync>,
    type_name: &'static str,
}

#[derive(Clone)]
pub struct JobContext {
    cancel: CancellationToken,
    deadline: Option<Instant>,
    annotations: HashMap<&'static str, Annotation>,
}

impl Default for JobContext {
    fn default() -> Self {
        Self::new()
    }
}

impl JobContext {
    /// A context with a fresh cancellation token, no deadline and no annotations.
    pub fn new() -> Self {
        Self::with_cancellation(CancellationToken::new())
    }

    pub fn with_cancellation(cancel: CancellationToken) -> Self {
        Self {
            cancel,
            deadline: None,
            annotations: HashMap::new(),
        }
    }

    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(deadline);
        self
    }

    pub fn with_timeout(self, timeout: Duration) -> Self {
        self.with_deadline(Instant::now() + timeout)
    }

    /// Derive a context whose token is cancelled together with this one.
    pub fn child(&self) -> Self {
        Self {
            cancel: self.cancel.child_token(),
            deadline: self.deadline,
            annotations: self.annotations.clone(),
        }
    }

    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled() || self.deadline.is_some_and(|d| Instant::now() >= d)
    }

    /// Resolves once the token is cancelled or the deadline passes.
    pub async fn cancelled(&self) {
        match self.deadline {
            Some(deadline) => {
                tokio::select! {
                    _ = self.cancel.cancelled() => {}
                    _ = tokio::time::sleep_until(deadline) => {}
                }
            }
            None => self.cancel.cancelled().await,
        }
    }

    /// Attach `value` under `key`, replacing any earlier annotation with that name.
    pub fn with_value<T>(mut self, key: &AnnotationKey<T>, value: T) -> Self
    where
        T: Any + Send + Sync,
    {
        self.annotations.insert(
            key.name,
            Annotation {
                value: Arc::new(value),
                type_name: std::any::type_name::<T>(),
            },
        );
        self
    }

    /// Look up the annotation stored under `key`.
    ///
    /// Returns `Ok(None)` when nothing is stored and
    /// [`ContextError::TypeMismatch`] when another key with the same name
    /// stored a value of a different type.
    pub fn value<T>(&self, key: &AnnotationKey<T>) -> Result<Option<&T>, ContextError>
    where
        T: Any + Send + Sync,
    {
        let Some(annotation) = self.annotations.get(key.name) else {
            return Ok(None);
        };
        annotation
            .value
            .downcast_ref::<T>()
            .map(Some)
            .ok_or(ContextError::TypeMismatch {
                key: key.name,
                expected: std::any::type_name::<T>(),
                found: annotation.type_name,
            })
    }

    pub fn contains(&self, name: &str) -> bool {
        self.annotations.contains_key(name)
    }

    pub fn without(mut self, name: &str) -> Self {
        self.annotations.remove(name);
        self
    }

    pub fn annotation_count(&self) -> usize {
        self.annotations.len()
    }
}

impl fmt::Debug for JobContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut keys: Vec<_> = self.annotations.keys().collect();
        keys.sort();
        f.debug_struct("JobContext")
            .field("cancelled", &self.cancel.is_cancelled())
            .field("deadline", &self.deadline)
            .field("annotations", &keys)
            .finish()
    }
}
