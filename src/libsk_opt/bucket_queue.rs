// Copyright 2022 Karl Sundequist Blomdahl <karl.sundequist.blomdahl@gmail.com>
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU32, AtomicUsize, Ordering};
use std::sync::Arc;

use crossbeam_queue::SegQueue;
use crossbeam_utils::{Backoff, CachePadded};

use crate::alloc::try_boxed_slice;
use crate::error::OptimizerError;
use crate::status::StatusFlag;

/// Marker published by a thread that is not holding any order value.
const IDLE: u32 = u32::MAX;

/// Concurrent priority queue over monotone integer order values, backed by a
/// ring of lock-free FIFO buckets indexed by `order_value % num_buckets`.
///
/// Correctness rests on two contracts the producers uphold by construction:
///
/// * every payload added while expanding a payload of order value `v` has an
///   order value in `[v + min_delta, v + max_delta]`, and
/// * the ring holds at least `max_delta + min_delta + 1` buckets, so a
///   producer can never wrap into the bucket the consumers are draining.
///
/// Consumers share a `minimum_order_value` floor. A consumer may only move
/// the floor past its bucket once no other thread can still produce into it,
/// which is guaranteed while `floor < min(currently_processed) + min_delta`.
pub struct BucketPriorityQueue {
    buckets: Box<[SegQueue<u64>]>,
    min_delta: u32,
    minimum_order_value: AtomicU32,
    currently_processed: Box<[CachePadded<AtomicU32>]>,
    outstanding: AtomicI64,
    waiting: AtomicUsize,
    drained: AtomicBool,
    status: Arc<StatusFlag>
}

impl BucketPriorityQueue {
    /// Creates a queue for `num_threads` consumers.
    ///
    /// # Arguments
    ///
    /// * `min_delta` - smallest order-value increase of one expansion step
    /// * `max_delta` - largest order-value increase of one expansion step;
    ///   initial payloads must not exceed it either
    /// * `num_threads` -
    /// * `status` - global stop flag checked while parked
    ///
    pub fn new(
        min_delta: u32,
        max_delta: u32,
        num_threads: usize,
        status: Arc<StatusFlag>
    ) -> Result<BucketPriorityQueue, OptimizerError>
    {
        debug_assert!(min_delta >= 1);
        debug_assert!(max_delta >= min_delta);
        debug_assert!(num_threads >= 1);

        let num_buckets = (min_delta as usize) + (max_delta as usize) + 1;
        let buckets = try_boxed_slice(num_buckets, "priority queue buckets", SegQueue::new)?;
        let currently_processed = try_boxed_slice(
            num_threads,
            "processing levels",
            || CachePadded::new(AtomicU32::new(IDLE))
        )?;

        Ok(BucketPriorityQueue {
            buckets,
            min_delta,
            minimum_order_value: AtomicU32::new(0),
            currently_processed,
            outstanding: AtomicI64::new(0),
            waiting: AtomicUsize::new(0),
            drained: AtomicBool::new(false),
            status
        })
    }

    /// Inserts a payload. The order value must not lie below the current
    /// floor; producers arrange this by construction.
    ///
    /// # Arguments
    ///
    /// * `order_value` -
    /// * `payload` -
    ///
    pub fn add(&self, order_value: u32, payload: u64) {
        debug_assert!(order_value >= self.minimum_order_value.load(Ordering::Relaxed));

        self.buckets[order_value as usize % self.buckets.len()].push(payload);
        self.outstanding.fetch_add(1, Ordering::AcqRel);
    }

    /// The number of payloads not yet removed.
    pub fn pending(&self) -> usize {
        self.outstanding.load(Ordering::Acquire).max(0) as usize
    }

    /// Removes a payload of minimal order value. Payloads for which
    /// `is_stale` returns true are dropped on the floor. Returns `None` only
    /// once every consumer is parked here and no payload remains, or when
    /// the search has been stopped.
    ///
    /// # Arguments
    ///
    /// * `thread` - index of the calling consumer
    /// * `is_stale` -
    ///
    pub fn remove_first<F>(&self, thread: usize, is_stale: F) -> Option<u64>
        where F: Fn(u64) -> bool
    {
        'claim: loop {
            if self.status.is_stopped() || self.drained.load(Ordering::Acquire) {
                return self.park(thread);
            }

            // claim one of the outstanding payloads
            if self.outstanding.fetch_sub(1, Ordering::AcqRel) <= 0 {
                self.outstanding.fetch_add(1, Ordering::AcqRel);

                if !self.wait_for_payloads(thread) {
                    return self.park(thread);
                }

                continue 'claim;
            }

            // a payload is guaranteed to exist at or above the floor; walk
            // the floor forward until we find it
            let backoff = Backoff::new();

            loop {
                let cursor = self.minimum_order_value.load(Ordering::Acquire);
                self.currently_processed[thread].store(cursor, Ordering::Release);

                if let Some(payload) = self.buckets[cursor as usize % self.buckets.len()].pop() {
                    if is_stale(payload) {
                        // the claim is spent on the stale entry, take another
                        continue 'claim;
                    }

                    return Some(payload);
                }

                if self.status.is_stopped() {
                    return self.park(thread);
                }

                if cursor < self.processing_floor(thread).saturating_add(self.min_delta) {
                    // nobody can produce into this bucket anymore
                    let _ = self.minimum_order_value.compare_exchange(
                        cursor,
                        cursor + 1,
                        Ordering::AcqRel,
                        Ordering::Acquire
                    );
                    backoff.reset();
                } else {
                    // a lower-valued producer may still emit into our bucket
                    backoff.snooze();
                }
            }
        }
    }

    /// Spins until payloads become claimable again. Returns false once the
    /// queue is drained or stopped.
    fn wait_for_payloads(&self, thread: usize) -> bool {
        let waiting = self.waiting.fetch_add(1, Ordering::AcqRel) + 1;

        if waiting == self.currently_processed.len() && self.outstanding.load(Ordering::Acquire) <= 0 {
            // every consumer is in here and nothing is left: drained
            self.drained.store(true, Ordering::Release);
        }

        let backoff = Backoff::new();
        let alive = loop {
            if self.drained.load(Ordering::Acquire) || self.status.is_stopped() {
                break false;
            }
            if self.outstanding.load(Ordering::Acquire) > 0 {
                break true;
            }

            // publish the floor so other consumers are not blocked on our
            // stale processing level
            let minimum = self.minimum_order_value.load(Ordering::Acquire);
            self.currently_processed[thread].store(minimum, Ordering::Release);
            backoff.snooze();
        };

        self.waiting.fetch_sub(1, Ordering::AcqRel);
        alive
    }

    fn park(&self, thread: usize) -> Option<u64> {
        self.currently_processed[thread].store(IDLE, Ordering::Release);

        None
    }

    /// The lowest order value any *other* thread is currently holding.
    fn processing_floor(&self, thread: usize) -> u32 {
        self.currently_processed.iter()
            .enumerate()
            .filter(|(other, _)| *other != thread)
            .map(|(_, level)| level.load(Ordering::Acquire))
            .min()
            .unwrap_or(IDLE)
    }
}
