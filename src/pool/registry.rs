//! The jobId -> Runner address map: the only process-wide index, protected
//! by a single small critical section that is never held across I/O (§4.4,
//! §9 "Cross-process references"). Mirrors `ReservationStore`'s
//! (`domain/vrm_system_model/reservation/reservation_store.rs`) shape of
//! pairing a single lock with a plain map rather than sharding or RCU,
//! narrowed from a `SlotMap` (key-generating store) to a plain `HashMap`
//! since job ids are already unique strings supplied by callers.

use crate::worker::runner::JobRunner;
use actix::Addr;
use std::collections::HashMap;
use std::sync::Mutex;

#[derive(Default)]
pub struct JobRegistry {
    inner: Mutex<HashMap<String, Addr<JobRunner>>>,
}

impl JobRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, job_id: String, runner: Addr<JobRunner>) {
        self.inner.lock().expect("registry mutex poisoned").insert(job_id, runner);
    }

    pub fn remove(&self, job_id: &str) {
        self.inner.lock().expect("registry mutex poisoned").remove(job_id);
    }

    pub fn get(&self, job_id: &str) -> Option<Addr<JobRunner>> {
        self.inner.lock().expect("registry mutex poisoned").get(job_id).cloned()
    }

    pub fn all_runners(&self) -> Vec<Addr<JobRunner>> {
        self.inner.lock().expect("registry mutex poisoned").values().cloned().collect()
    }

    pub fn all(&self) -> Vec<(String, Addr<JobRunner>)> {
        self.inner.lock().expect("registry mutex poisoned").iter().map(|(k, v)| (k.clone(), v.clone())).collect()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().expect("registry mutex poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
