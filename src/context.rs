//! # Execution Context
//!
//! Shared, mutable, string-keyed store handed by reference through a whole call
//! tree. Cloning an [`ExecutionContext`] produces another handle onto the same
//! store, so nested and parallel tasks all observe one instance.
//!
//! The context also carries an explicit slot for the connection shared by an
//! enclosing [`TransactionScope`](crate::transaction::TransactionScope). Tasks
//! query it through [`ExecutionContext::shared_connection`]; only the scope
//! that owns the connection can publish or withdraw it.
//!
//! Concurrent writes from parallel siblings are permitted. The store stays
//! consistent, but ordering between siblings writing the same key is up to the
//! tasks themselves.

use dashmap::DashMap;
use parking_lot::RwLock;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use crate::transaction::SharedConnectionHandle;

#[derive(Clone, Default)]
pub struct ExecutionContext {
    inner: Arc<ContextInner>,
}

#[derive(Default)]
struct ContextInner {
    values: DashMap<String, Value>,
    shared_connection: RwLock<Option<SharedConnectionHandle>>,
}

impl ExecutionContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a context pre-populated with the given entries
    pub fn from_values<K, I>(entries: I) -> Self
    where
        K: Into<String>,
        I: IntoIterator<Item = (K, Value)>,
    {
        let context = Self::new();
        for (key, value) in entries {
            context.put(key, value);
        }
        context
    }

    pub fn get(&self, key: &str) -> Option<Value> {
        self.inner.values.get(key).map(|entry| entry.value().clone())
    }

    /// Read a value and deserialize it into `T`
    ///
    /// Returns `Ok(None)` when the key is absent.
    pub fn get_as<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, serde_json::Error> {
        self.get(key).map(serde_json::from_value).transpose()
    }

    /// Store a value, returning the previous one
    pub fn put(&self, key: impl Into<String>, value: impl Into<Value>) -> Option<Value> {
        self.inner.values.insert(key.into(), value.into())
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.inner.values.contains_key(key)
    }

    pub fn remove(&self, key: &str) -> Option<Value> {
        self.inner.values.remove(key).map(|(_, value)| value)
    }

    pub fn len(&self) -> usize {
        self.inner.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.values.is_empty()
    }

    pub fn keys(&self) -> Vec<String> {
        self.inner
            .values
            .iter()
            .map(|entry| entry.key().clone())
            .collect()
    }

    /// Point-in-time copy of every entry
    pub fn snapshot(&self) -> HashMap<String, Value> {
        self.inner
            .values
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect()
    }

    /// Whether two handles refer to the same underlying store
    pub fn same_instance(&self, other: &ExecutionContext) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// The connection published by the enclosing transaction scope, if any
    ///
    /// Tasks that talk to the database must check this before opening a
    /// private connection so their work joins the surrounding transaction.
    pub fn shared_connection(&self) -> Option<SharedConnectionHandle> {
        self.inner.shared_connection.read().clone()
    }

    pub fn has_shared_connection(&self) -> bool {
        self.inner.shared_connection.read().is_some()
    }

    /// Publish `handle` unless another connection is already published
    ///
    /// The check and the write happen under one lock; on conflict the handle
    /// already in place is returned and `handle` is not published.
    pub(crate) fn publish_if_absent(
        &self,
        handle: SharedConnectionHandle,
    ) -> Result<(), SharedConnectionHandle> {
        let mut slot = self.inner.shared_connection.write();
        match slot.as_ref() {
            Some(current) => Err(current.clone()),
            None => {
                *slot = Some(handle);
                Ok(())
            }
        }
    }

    /// Withdraw the published connection if it is `handle`
    pub(crate) fn withdraw_connection(&self, handle: &SharedConnectionHandle) -> bool {
        let mut slot = self.inner.shared_connection.write();
        if slot.as_ref().is_some_and(|current| current.same_connection(handle)) {
            *slot = None;
            return true;
        }
        false
    }
}

impl fmt::Debug for ExecutionContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut keys = self.keys();
        keys.sort();
        f.debug_struct("ExecutionContext")
            .field("keys", &keys)
            .field("shared_connection", &self.shared_connection().map(|h| h.id()))
            .finish()
    }
}
