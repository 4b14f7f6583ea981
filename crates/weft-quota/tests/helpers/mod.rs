use std::sync::{Arc, Mutex};

use weft_quota::QuotaError;

mod tracing_common;

pub(crate) use tracing_common::setup_tracing;

/// Records what the callbacks it hands out were called with.
#[derive(Clone, Default)]
pub(crate) struct Recorder(Arc<Mutex<Vec<Result<(), QuotaError>>>>);

impl Recorder {
    pub(crate) fn callback(&self) -> impl FnOnce(Result<(), QuotaError>) + Send + 'static {
        let results = self.0.clone();
        move |result| results.lock().unwrap().push(result)
    }

    pub(crate) fn results(&self) -> Vec<Result<(), QuotaError>> {
        self.0.lock().unwrap().clone()
    }

    pub(crate) fn fired(&self) -> bool {
        !self.0.lock().unwrap().is_empty()
    }
}
