//! Shared helpers for integration tests: an in-memory transport with call
//! recording and scripted failures.

#![allow(dead_code)]

use async_trait::async_trait;
use merka_reconcile::schema::{normalize, FieldSpec, FieldType, ResourceSchema};
use merka_reconcile::{FieldMap, Transport};
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::{Arc, Mutex};

/// Set up logging for tests
pub fn init_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("debug")
        .with_test_writer()
        .try_init();
}

#[derive(Debug, Clone, thiserror::Error)]
#[error("mock {op:?} failed: {message}")]
pub struct MockError {
    pub op: Op,
    pub message: String,
    pub retryable: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Op {
    Read,
    Write,
    Delete,
    Create,
}

/// A recorded transport call.
#[derive(Debug, Clone, PartialEq)]
pub enum Call {
    Read(String),
    Write(String, FieldMap),
    Delete(String),
    Create(FieldMap),
}

impl Call {
    pub fn op(&self) -> Op {
        match self {
            Call::Read(_) => Op::Read,
            Call::Write(..) => Op::Write,
            Call::Delete(_) => Op::Delete,
            Call::Create(_) => Op::Create,
        }
    }
}

/// Transport over an in-memory map of id to fields. A created resource's
/// id is the value of `id_field`.
#[derive(Clone)]
pub struct MockTransport {
    id_field: &'static str,
    resources: Arc<Mutex<BTreeMap<String, FieldMap>>>,
    calls: Arc<Mutex<Vec<Call>>>,
    failures: Arc<Mutex<HashMap<Op, VecDeque<MockError>>>>,
}

impl MockTransport {
    pub fn new(id_field: &'static str) -> Self {
        Self {
            id_field,
            resources: Arc::new(Mutex::new(BTreeMap::new())),
            calls: Arc::new(Mutex::new(Vec::new())),
            failures: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Puts a resource in place without recording a call.
    pub fn insert(&self, id: &str, fields: FieldMap) {
        self.resources.lock().unwrap().insert(id.to_string(), fields);
    }

    pub fn remote(&self, id: &str) -> Option<FieldMap> {
        self.resources.lock().unwrap().get(id).cloned()
    }

    /// Makes the next `times` calls of `op` fail.
    pub fn fail_next(&self, op: Op, times: usize, retryable: bool) {
        let mut failures = self.failures.lock().unwrap();
        let queue = failures.entry(op).or_default();
        for i in 0..times {
            queue.push_back(MockError {
                op,
                message: format!("scripted failure #{}", i + 1),
                retryable,
            });
        }
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    pub fn count(&self, op: Op) -> usize {
        self.calls().iter().filter(|c| c.op() == op).count()
    }

    /// Calls other than reads.
    pub fn mutations(&self) -> Vec<Call> {
        self.calls()
            .into_iter()
            .filter(|c| c.op() != Op::Read)
            .collect()
    }

    pub fn clear_calls(&self) {
        self.calls.lock().unwrap().clear();
    }

    fn record(&self, call: Call) -> Result<(), MockError> {
        let op = call.op();
        self.calls.lock().unwrap().push(call);
        match self
            .failures
            .lock()
            .unwrap()
            .get_mut(&op)
            .and_then(VecDeque::pop_front)
        {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl Transport for MockTransport {
    type Error = MockError;

    async fn read(&self, id: &str) -> Result<Option<FieldMap>, MockError> {
        self.record(Call::Read(id.to_string()))?;
        Ok(self.remote(id))
    }

    async fn write(&self, id: &str, payload: &FieldMap) -> Result<Option<String>, MockError> {
        self.record(Call::Write(id.to_string(), payload.clone()))?;
        let moved_to = payload
            .get(self.id_field)
            .and_then(|v| v.as_str())
            .filter(|new_id| *new_id != id)
            .map(str::to_string);
        let mut resources = self.resources.lock().unwrap();
        let mut stored = resources.remove(id).unwrap_or_default();
        stored.extend_from(payload);
        resources.insert(moved_to.clone().unwrap_or_else(|| id.to_string()), stored);
        Ok(moved_to)
    }

    async fn delete(&self, id: &str) -> Result<(), MockError> {
        self.record(Call::Delete(id.to_string()))?;
        self.resources.lock().unwrap().remove(id);
        Ok(())
    }

    async fn create(&self, desired: &FieldMap) -> Result<String, MockError> {
        self.record(Call::Create(desired.clone()))?;
        let id = desired
            .get(self.id_field)
            .and_then(|v| v.as_str())
            .unwrap_or("generated")
            .to_string();
        self.resources
            .lock()
            .unwrap()
            .insert(id.clone(), desired.clone());
        Ok(id)
    }

    fn is_retryable(&self, error: &MockError) -> bool {
        error.retryable
    }
}

/// A key-like resource: `path` forces a replacement, `ttl` and `description`
/// change in place, `exportable` latches and `version` is computed.
pub fn key_schema() -> ResourceSchema {
    ResourceSchema::new(
        "mock_key",
        vec![
            FieldSpec::immutable("path", FieldType::String)
                .normalized(normalize::trim_slashes)
                .validated(normalize::non_empty),
            FieldSpec::mutable("ttl", FieldType::Int)
                .with_default(0)
                .normalized(normalize::duration_seconds)
                .always_send(),
            FieldSpec::mutable("description", FieldType::String),
            FieldSpec::mutable("exportable", FieldType::Bool)
                .with_default(false)
                .latch(),
            FieldSpec::computed("version", FieldType::Int),
        ],
    )
}

/// Like [`key_schema`], but `path` changes in place and the write moves the
/// resource.
pub fn movable_schema() -> ResourceSchema {
    ResourceSchema::new(
        "mock_key",
        vec![
            FieldSpec::mutable("path", FieldType::String)
                .normalized(normalize::trim_slashes)
                .validated(normalize::non_empty),
            FieldSpec::mutable("ttl", FieldType::Int)
                .with_default(0)
                .normalized(normalize::duration_seconds),
        ],
    )
}
