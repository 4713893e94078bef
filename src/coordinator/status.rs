//! Per-worker completion tracking.
//!
//! Each fan-out branch owns one record. `final_status` flips to true
//! exactly when the branch will never be retried again, which is the
//! condition the aggregation gate asserts before any merge happens.

use crate::wire::{ServiceResult, ServiceState, WireFinding};

#[derive(Debug, Clone)]
pub struct ServiceStatus {
    pub service_name: String,
    pub status: ServiceState,
    pub final_status: bool,
    pub retry_count: u32,
    pub result: Vec<WireFinding>,
    pub error: Option<String>,
}

impl ServiceStatus {
    pub fn pending(service_name: &str) -> Self {
        Self {
            service_name: service_name.to_string(),
            status: ServiceState::Pending,
            final_status: false,
            retry_count: 0,
            result: Vec::new(),
            error: None,
        }
    }

    pub fn mark_success(&mut self, results: Vec<WireFinding>) {
        self.status = ServiceState::Success;
        self.final_status = true;
        self.result = results;
        self.error = None;
    }

    pub fn mark_exhausted(&mut self, error: String) {
        self.status = ServiceState::Exhausted;
        self.final_status = true;
        self.result = Vec::new();
        self.error = Some(error);
    }

    pub fn into_service_result(self) -> ServiceResult {
        ServiceResult {
            service_name: self.service_name,
            status: self.status,
            final_status: self.final_status,
            retry_count: self.retry_count,
            results: self.result,
            error: self.error,
        }
    }
}
