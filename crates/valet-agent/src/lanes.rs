// SPDX-FileCopyrightText: 2026 Valet Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Per-key serial work lanes with a bounded mailbox.
//!
//! Each key (a user) gets one worker task that runs its jobs strictly in
//! arrival order. A lane holds at most `depth_cap` jobs including the one
//! running; submissions beyond that are rejected so a flooding user backs
//! up their own lane, never anyone else's.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};

use tokio::sync::mpsc;
use tracing::{debug, warn};

type Job = Pin<Box<dyn Future<Output = ()> + Send>>;

struct Lane {
    tx: mpsc::UnboundedSender<Job>,
    /// Jobs queued plus the one running. Maintained under the map lock.
    depth: usize,
}

/// Keyed serial executor with per-lane depth caps.
#[derive(Clone)]
pub struct LaneQueue {
    lanes: Arc<Mutex<HashMap<String, Lane>>>,
    depth_cap: usize,
}

impl LaneQueue {
    pub fn new(depth_cap: usize) -> Self {
        Self {
            lanes: Arc::new(Mutex::new(HashMap::new())),
            depth_cap,
        }
    }

    /// Submits a job to the key's lane. Returns `false` (dropping the job)
    /// when the lane is already at its depth cap.
    pub fn submit<F>(&self, key: &str, job: F) -> bool
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let mut lanes = self.lanes.lock().unwrap_or_else(|e| e.into_inner());

        if let Some(lane) = lanes.get_mut(key) {
            if lane.depth >= self.depth_cap {
                warn!(key, depth = lane.depth, "lane full, rejecting job");
                return false;
            }
            lane.depth += 1;
            // The worker only exits after removing its entry under this
            // lock, so the send cannot race a closed receiver.
            let _ = lane.tx.send(Box::pin(job));
            return true;
        }

        let (tx, mut rx) = mpsc::unbounded_channel::<Job>();
        let _ = tx.send(Box::pin(job));
        lanes.insert(key.to_string(), Lane { tx, depth: 1 });

        let lanes_ref = Arc::clone(&self.lanes);
        let worker_key = key.to_string();
        tokio::spawn(async move {
            while let Some(job) = rx.recv().await {
                // Run each job in its own task so a panic poisons nothing
                // and order within the lane is preserved.
                let _ = tokio::spawn(job).await;

                let mut lanes = lanes_ref.lock().unwrap_or_else(|e| e.into_inner());
                let Some(lane) = lanes.get_mut(&worker_key) else {
                    break;
                };
                lane.depth -= 1;
                if lane.depth == 0 {
                    lanes.remove(&worker_key);
                    debug!(key = %worker_key, "lane drained");
                    break;
                }
            }
        });

        true
    }

    /// Current depth of a key's lane (0 when idle).
    pub fn depth(&self, key: &str) -> usize {
        self.lanes
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(key)
            .map_or(0, |lane| lane.depth)
    }
}
