// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Per-resource FIFO reservations
//!
//! Each resource id owns a queue. The first reservation on an idle resource
//! is granted immediately; later ones wait for a oneshot grant sent when the
//! holder releases. Reservations without a resource id are never queued.

use crate::error::ReservationError;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::oneshot;

struct Waiter {
    ticket: u64,
    grant: oneshot::Sender<()>,
}

#[derive(Default)]
struct ResourceQueue {
    holder: Option<u64>,
    waiters: VecDeque<Waiter>,
}

#[derive(Default)]
struct Inner {
    queues: HashMap<String, ResourceQueue>,
    next_ticket: u64,
    closed: bool,
}

/// Grants exclusive, FIFO-ordered access to named resources
#[derive(Clone, Default)]
pub struct ReservationManager {
    inner: Arc<Mutex<Inner>>,
}

impl ReservationManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Take a place in `resource_id`'s queue
    ///
    /// Queue order is fixed here, at call time; awaiting the returned
    /// [`Reservation`] waits for that turn.
    pub fn reserve(&self, resource_id: Option<&str>) -> Result<Reservation, ReservationError> {
        let mut inner = self.lock();
        if inner.closed {
            return Err(ReservationError::Unavailable);
        }

        let Some(resource_id) = resource_id.filter(|r| !r.is_empty()) else {
            return Ok(Reservation {
                manager: self.clone(),
                resource_id: None,
                ticket: 0,
                pending: None,
                acquired: false,
            });
        };

        inner.next_ticket += 1;
        let ticket = inner.next_ticket;
        let queue = inner.queues.entry(resource_id.to_string()).or_default();

        let pending = if queue.holder.is_none() && queue.waiters.is_empty() {
            queue.holder = Some(ticket);
            tracing::debug!(resource_id, ticket, "reservation granted");
            None
        } else {
            let (grant, pending) = oneshot::channel();
            queue.waiters.push_back(Waiter { ticket, grant });
            tracing::debug!(
                resource_id,
                ticket,
                queued = queue.waiters.len(),
                "reservation queued"
            );
            Some(pending)
        };

        Ok(Reservation {
            manager: self.clone(),
            resource_id: Some(resource_id.to_string()),
            ticket,
            pending,
            acquired: false,
        })
    }

    /// Refuse new reservations and fail everything still queued
    pub fn close(&self) {
        let mut inner = self.lock();
        inner.closed = true;
        for queue in inner.queues.values_mut() {
            // Dropping the senders wakes each waiter with an error
            queue.waiters.clear();
        }
        inner.queues.retain(|_, q| q.holder.is_some());
    }

    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }

    /// Resource ids currently held or waited on
    pub fn active_resources(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.lock().queues.keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Number of reservations waiting behind the holder of `resource_id`
    pub fn queue_len(&self, resource_id: &str) -> usize {
        self.lock()
            .queues
            .get(resource_id)
            .map_or(0, |q| q.waiters.len())
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Hand `resource_id` to the next live waiter, or forget the queue
    fn release(&self, resource_id: &str, ticket: u64) {
        let mut inner = self.lock();
        let Some(queue) = inner.queues.get_mut(resource_id) else {
            return;
        };
        if queue.holder != Some(ticket) {
            return;
        }

        queue.holder = None;
        while let Some(waiter) = queue.waiters.pop_front() {
            if waiter.grant.send(()).is_ok() {
                queue.holder = Some(waiter.ticket);
                tracing::debug!(resource_id, ticket = waiter.ticket, "reservation granted");
                return;
            }
        }
        inner.queues.remove(resource_id);
        tracing::debug!(resource_id, "reservation queue drained");
    }

    /// Give up a reservation that never produced a guard
    fn abandon(&self, resource_id: &str, ticket: u64) {
        {
            let mut inner = self.lock();
            let Some(queue) = inner.queues.get_mut(resource_id) else {
                return;
            };
            if let Some(pos) = queue.waiters.iter().position(|w| w.ticket == ticket) {
                queue.waiters.remove(pos);
                return;
            }
        }
        // Granted after the waiter stopped listening
        self.release(resource_id, ticket);
    }
}

/// A place in a resource queue
///
/// Dropping it before [`acquire`](Self::acquire) completes gives the place
/// up without disturbing later waiters.
pub struct Reservation {
    manager: ReservationManager,
    resource_id: Option<String>,
    ticket: u64,
    pending: Option<oneshot::Receiver<()>>,
    acquired: bool,
}

impl Reservation {
    pub fn resource_id(&self) -> Option<&str> {
        self.resource_id.as_deref()
    }

    /// Whether the turn came at reserve time
    pub fn is_granted(&self) -> bool {
        self.pending.is_none()
    }

    /// Wait for this reservation's turn, at most `timeout` when given
    pub async fn acquire(
        mut self,
        timeout: Option<Duration>,
    ) -> Result<ReservationGuard, ReservationError> {
        if let Some(pending) = self.pending.as_mut() {
            let granted = match timeout {
                Some(limit) => match tokio::time::timeout(limit, pending).await {
                    Ok(granted) => granted,
                    Err(_) => {
                        return Err(ReservationError::TimedOut {
                            resource_id: self.resource_id.clone().unwrap_or_default(),
                            waited: limit,
                        })
                    }
                },
                None => pending.await,
            };
            if granted.is_err() {
                return Err(ReservationError::Unavailable);
            }
        }

        self.acquired = true;
        Ok(ReservationGuard {
            manager: self.manager.clone(),
            resource_id: self.resource_id.take(),
            ticket: self.ticket,
        })
    }
}

impl Drop for Reservation {
    fn drop(&mut self) {
        if self.acquired {
            return;
        }
        if let Some(resource_id) = self.resource_id.take() {
            self.manager.abandon(&resource_id, self.ticket);
        }
    }
}

/// Exclusive hold on a resource; released on drop
pub struct ReservationGuard {
    manager: ReservationManager,
    resource_id: Option<String>,
    ticket: u64,
}

impl ReservationGuard {
    pub fn resource_id(&self) -> Option<&str> {
        self.resource_id.as_deref()
    }
}

impl Drop for ReservationGuard {
    fn drop(&mut self) {
        if let Some(resource_id) = self.resource_id.take() {
            self.manager.release(&resource_id, self.ticket);
        }
    }
}

#[cfg(test)]
#[path = "reservation_tests.rs"]
mod tests;
