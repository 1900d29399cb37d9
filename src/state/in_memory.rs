//! In-memory [`StateStore`] for tests. Result rows and lecture records are
//! seeded explicitly; lookups and status updates can be made to fail once.

use super::{StateError, StateResult, StateStore};
use crate::models::{ErrorDetails, LectureStatus, LectureStatusRecord};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use tracing::debug;

#[derive(Debug, Default)]
struct Inner {
    results: HashSet<(String, String, i32)>,
    lectures: HashMap<String, LectureStatusRecord>,
    fail_next_lookups: u32,
    fail_next_mark_failed: u32,
    lookups: u64,
    mark_failed_calls: Vec<(String, ErrorDetails)>,
}

#[derive(Debug, Default)]
pub struct InMemoryStateStore {
    inner: Mutex<Inner>,
}

impl InMemoryStateStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a result row, as the processing service does on success
    pub fn record_step_result(&self, result_table: &str, lecture_id: &str, slide_number: i32) {
        self.inner.lock().results.insert((
            result_table.to_string(),
            lecture_id.to_string(),
            slide_number,
        ));
    }

    pub fn insert_lecture(&self, lecture_id: &str, status: LectureStatus) {
        self.inner.lock().lectures.insert(
            lecture_id.to_string(),
            LectureStatusRecord {
                lecture_id: lecture_id.to_string(),
                status,
                error_details: None,
            },
        );
    }

    /// Make the next `times` result lookups fail
    pub fn fail_next_lookups(&self, times: u32) {
        self.inner.lock().fail_next_lookups = times;
    }

    /// Make the next `times` status updates fail
    pub fn fail_next_mark_failed(&self, times: u32) {
        self.inner.lock().fail_next_mark_failed = times;
    }

    /// Number of result lookups performed, including failed ones
    pub fn lookup_count(&self) -> u64 {
        self.inner.lock().lookups
    }

    /// Every successful `mark_failed` call, in order
    pub fn mark_failed_calls(&self) -> Vec<(String, ErrorDetails)> {
        self.inner.lock().mark_failed_calls.clone()
    }
}

#[async_trait]
impl StateStore for InMemoryStateStore {
    async fn step_result_exists(
        &self,
        result_table: &str,
        lecture_id: &str,
        slide_number: i32,
    ) -> StateResult<bool> {
        let mut inner = self.inner.lock();
        inner.lookups += 1;
        if inner.fail_next_lookups > 0 {
            inner.fail_next_lookups -= 1;
            return Err(StateError::query("step_result_exists", "injected failure"));
        }
        let key = (result_table.to_string(), lecture_id.to_string(), slide_number);
        Ok(inner.results.contains(&key))
    }

    async fn mark_failed(&self, lecture_id: &str, details: &ErrorDetails) -> StateResult<u64> {
        let mut inner = self.inner.lock();
        if inner.fail_next_mark_failed > 0 {
            inner.fail_next_mark_failed -= 1;
            return Err(StateError::query("mark_failed", "injected failure"));
        }
        inner
            .mark_failed_calls
            .push((lecture_id.to_string(), details.clone()));

        match inner.lectures.get_mut(lecture_id) {
            Some(record) => {
                record.status = LectureStatus::Failed;
                record.error_details = Some(details.clone());
                Ok(1)
            }
            None => {
                debug!(lecture_id, "No lecture row to mark failed");
                Ok(0)
            }
        }
    }

    async fn lecture_status(&self, lecture_id: &str) -> StateResult<Option<LectureStatusRecord>> {
        Ok(self.inner.lock().lectures.get(lecture_id).cloned())
    }
}
