// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Queue gateway: durable at-least-once delivery over the store.
//!
//! Claims are atomic under the state lock (the CAS equivalent of
//! `FOR UPDATE SKIP LOCKED`): two workers polling concurrently can never
//! claim the same job. Expiration is the safety net for hung handlers, and
//! retries are bounded per queue policy; past the limit a job goes `dead`
//! and finalisation is left to the stale reaper or zombie reconciler.

use agendo_core::{Event, QueueJob, QueueJobId, QueueJobStatus, QueueName, WorkerId};

use crate::store::{emit_locked, Store, StoreError};

impl Store {
    /// Enqueue a payload. Enqueueing a payload that already has a pending
    /// or active job on the same queue is a no-op returning the existing
    /// job id, so a duplicate enqueue can never double-spawn.
    pub fn enqueue(
        &self,
        queue: QueueName,
        payload: &str,
        now_ms: u64,
    ) -> Result<QueueJobId, StoreError> {
        let mut inner = self.inner.lock();

        if let Some(existing) = inner.state.queue_jobs.values().find(|j| {
            j.queue == queue
                && j.payload == payload
                && matches!(j.status, QueueJobStatus::Pending | QueueJobStatus::Active)
        }) {
            tracing::debug!(
                job_id = %existing.id,
                payload,
                "duplicate enqueue dropped"
            );
            return Ok(existing.id.clone());
        }

        let job = QueueJob {
            id: QueueJobId::new(format!("{queue}-{payload}-{now_ms}")),
            queue,
            payload: payload.to_string(),
            status: QueueJobStatus::Pending,
            attempts: 0,
            enqueued_at_ms: now_ms,
            available_at_ms: now_ms,
            expires_at_ms: None,
            claimed_by: None,
        };
        let id = job.id.clone();
        emit_locked(&mut inner, Event::JobEnqueued { job })?;
        Ok(id)
    }

    /// Atomically claim the oldest claimable job on a queue, stamping the
    /// worker id and the expiration deadline. Returns `None` when the queue
    /// has nothing claimable.
    pub fn claim_next(
        &self,
        queue: QueueName,
        worker_id: &WorkerId,
        now_ms: u64,
    ) -> Result<Option<QueueJob>, StoreError> {
        let mut inner = self.inner.lock();

        let next = inner
            .state
            .queue_jobs
            .values()
            .filter(|j| j.queue == queue && j.claimable(now_ms))
            .min_by_key(|j| (j.enqueued_at_ms, j.id.as_str().to_string()))
            .map(|j| j.id.clone());

        let Some(id) = next else {
            return Ok(None);
        };

        let expires_at_ms = now_ms + queue.spec().expire_after.as_millis() as u64;
        let event = Event::JobClaimed {
            id: id.clone(),
            worker_id: worker_id.clone(),
            expires_at_ms,
        };
        emit_locked(&mut inner, event)?;
        Ok(inner.state.queue_jobs.get(id.as_str()).cloned())
    }

    /// Mark a claimed job completed.
    pub fn complete_job(&self, id: &QueueJobId) -> Result<(), StoreError> {
        let mut inner = self.inner.lock();
        if !inner.state.queue_jobs.contains_key(id.as_str()) {
            return Err(StoreError::NotFound(format!("queue job not found: {id}")));
        }
        emit_locked(&mut inner, Event::JobCompleted { id: id.clone() })
    }

    /// Record a failed attempt: back to pending with backoff while retries
    /// remain, `dead` otherwise.
    pub fn fail_job(&self, id: &QueueJobId, error: &str, now_ms: u64) -> Result<(), StoreError> {
        let mut inner = self.inner.lock();
        let job = inner
            .state
            .queue_jobs
            .get(id.as_str())
            .ok_or_else(|| StoreError::NotFound(format!("queue job not found: {id}")))?;

        let spec = job.queue.spec();
        let retry_at_ms = if job.attempts < spec.retry_limit {
            Some(now_ms + spec.retry_backoff.as_millis() as u64)
        } else {
            None
        };
        let event = Event::JobFailed {
            id: id.clone(),
            error: error.to_string(),
            retry_at_ms,
        };
        emit_locked(&mut inner, event)
    }

    /// Release active claims whose expiration deadline has passed.
    /// Expiration counts as a failed attempt for the retry budget.
    pub fn expire_overdue_jobs(&self, now_ms: u64) -> Result<Vec<QueueJobId>, StoreError> {
        let mut inner = self.inner.lock();
        let overdue: Vec<(QueueJobId, QueueName, u32)> = inner
            .state
            .queue_jobs
            .values()
            .filter(|j| {
                j.status == QueueJobStatus::Active
                    && j.expires_at_ms.map(|at| at < now_ms).unwrap_or(false)
            })
            .map(|j| (j.id.clone(), j.queue, j.attempts))
            .collect();

        for (id, queue, attempts) in &overdue {
            let spec = queue.spec();
            let retry_at_ms = if *attempts < spec.retry_limit {
                Some(now_ms)
            } else {
                None
            };
            let event = Event::JobFailed {
                id: id.clone(),
                error: "claim expired".to_string(),
                retry_at_ms,
            };
            emit_locked(&mut inner, event)?;
        }
        Ok(overdue.into_iter().map(|(id, _, _)| id).collect())
    }
}

#[cfg(test)]
#[path = "queue_tests.rs"]
mod tests;
