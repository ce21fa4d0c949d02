//! Paddle subscription-plan metadata cache.
//!
//! Plan metadata (billing interval, trial length) changes rarely but is
//! needed on every Paddle parse that reconstructs an access-end date. The
//! cache is owned by the composition root and injected, so tests can seed a
//! fake; it is read-mostly, populated lazily by the gateway, and never
//! invalidated.

use std::collections::HashMap;
use std::sync::Mutex;

use super::RawVendorData;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlanInterval {
    Day,
    Month,
    Year,
}

#[derive(Debug, Clone)]
pub struct PaddlePlan {
    pub id: u64,
    pub interval: PlanInterval,
    /// Number of intervals per billing cycle (e.g. 1 year, 6 months).
    pub period: u32,
    pub trial_days: Option<u32>,
}

#[derive(Debug, Default)]
pub struct PlanCache {
    inner: Mutex<HashMap<u64, PaddlePlan>>,
}

impl PlanCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, plan_id: u64) -> Option<PaddlePlan> {
        self.inner.lock().unwrap().get(&plan_id).cloned()
    }

    pub fn insert(&self, plan: PaddlePlan) {
        self.inner.lock().unwrap().insert(plan.id, plan);
    }

    /// Fill in cached plan metadata for a Paddle payload that arrived
    /// without it, so the parser can reconstruct the access end from the
    /// real billing interval instead of the yearly fallback. Other vendors
    /// pass through untouched.
    pub fn attach(&self, raw: RawVendorData) -> RawVendorData {
        match raw {
            RawVendorData::Paddle { data, plan: None } => {
                let plan = data.plan_id.and_then(|id| self.get(id));
                RawVendorData::Paddle { data, plan }
            }
            other => other,
        }
    }
}
