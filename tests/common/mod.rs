#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use sales_lakehouse::PipelineError;
use sales_lakehouse::PipelineResult;
use sales_lakehouse::cleaning::load_raw;
use sales_lakehouse::config::StorageLayout;
use sales_lakehouse::context::PipelineContext;
use sales_lakehouse::execution::{
    ExecutionOptions, Pipeline, PipelineEvent, PipelineObserver, RetryPolicy,
};
use sales_lakehouse::store::{MemoryDocumentStore, MemoryObjectStore, ObjectStore};

pub const CUSTOMERS_CSV: &str = "clients.csv";
pub const PURCHASES_CSV: &str = "achats.csv";

pub fn fixture(name: &str) -> Vec<u8> {
    let path = std::path::Path::new(env!("CARGO_MANIFEST_DIR"))
        .join("tests/fixtures")
        .join(name);
    std::fs::read(&path).unwrap_or_else(|e| panic!("reading {}: {e}", path.display()))
}

pub fn load_fixtures(ctx: &PipelineContext) {
    load_raw(ctx, &fixture(CUSTOMERS_CSV), &fixture(PURCHASES_CSV)).unwrap();
}

pub fn pipeline(ctx: PipelineContext, workers: usize, max_in_flight_units: usize) -> Pipeline {
    Pipeline::new(
        ctx,
        ExecutionOptions {
            workers,
            max_in_flight_units,
        },
    )
    .unwrap()
    .with_retry_policy(RetryPolicy::immediate(3))
}

/// Object store that fails `get` on one key with a transient error, a configurable number of times.
pub struct FlakyObjectStore {
    inner: MemoryObjectStore,
    key: String,
    failures_left: AtomicUsize,
    gets: AtomicUsize,
}

impl FlakyObjectStore {
    pub fn new(key: &str) -> Self {
        Self {
            inner: MemoryObjectStore::new(),
            key: key.to_string(),
            failures_left: AtomicUsize::new(0),
            gets: AtomicUsize::new(0),
        }
    }

    /// Fail the next `n` reads of the key.
    pub fn fail_next(&self, n: usize) {
        self.failures_left.store(n, Ordering::SeqCst);
    }

    /// Reads of the key so far, failed ones included.
    pub fn gets(&self) -> usize {
        self.gets.load(Ordering::SeqCst)
    }
}

impl ObjectStore for FlakyObjectStore {
    fn get(&self, bucket: &str, key: &str) -> PipelineResult<Vec<u8>> {
        if key == self.key {
            self.gets.fetch_add(1, Ordering::SeqCst);
            let injected = self
                .failures_left
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok();
            if injected {
                return Err(PipelineError::StoreUnavailable {
                    message: format!("injected failure reading {bucket}/{key}"),
                });
            }
        }
        self.inner.get(bucket, key)
    }

    fn put(&self, bucket: &str, key: &str, data: &[u8]) -> PipelineResult<()> {
        self.inner.put(bucket, key, data)
    }

    fn bucket_exists(&self, bucket: &str) -> PipelineResult<bool> {
        self.inner.bucket_exists(bucket)
    }

    fn create_bucket(&self, bucket: &str) -> PipelineResult<()> {
        self.inner.create_bucket(bucket)
    }

    fn list(&self, bucket: &str, prefix: &str) -> PipelineResult<Vec<String>> {
        self.inner.list(bucket, prefix)
    }
}

/// In-memory context whose object store fails reads of `key` on demand.
pub fn flaky_context(key: &str) -> (PipelineContext, Arc<FlakyObjectStore>) {
    let objects = Arc::new(FlakyObjectStore::new(key));
    let ctx = PipelineContext::new(
        objects.clone(),
        Arc::new(MemoryDocumentStore::new()),
        StorageLayout::default(),
    );
    (ctx, objects)
}

/// Records every event in arrival order.
#[derive(Default)]
pub struct RecordingObserver {
    pub events: Mutex<Vec<PipelineEvent>>,
}

impl PipelineObserver for RecordingObserver {
    fn on_event(&self, event: &PipelineEvent) {
        self.events.lock().unwrap().push(event.clone());
    }
}
