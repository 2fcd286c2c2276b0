// Copyright 2026 Skipqueue Project Authors. Licensed under Apache-2.0.

use std::fmt::{self, Write};
use std::sync::atomic::{AtomicU32, Ordering};

use crossbeam_epoch::{self as epoch, Guard, Owned, Shared};
use crossbeam_utils::{Backoff, CachePadded};
use fail::fail_point;
use rand::Rng;

use crate::node::{Node, Tower};

/// A concurrent lock-free priority queue with per-entry payloads.
///
/// Entries are totally ordered by `K`; [`try_pop`](KvPriorityQueue::try_pop)
/// removes a minimum. Equal keys form a multiset and their relative pop
/// order is unspecified (it depends on insertion race outcomes).
///
/// `LEVELS` is the number of skip-list levels; node heights are drawn
/// uniformly from `1..=LEVELS`.
///
/// The queue is move-only. Share it across threads by reference or `Arc`.
pub struct KvPriorityQueue<K, V, const LEVELS: usize = 5> {
    head: Tower<K, V>,
    max_size: u32,
    size: CachePadded<AtomicU32>,
}

impl<K, V, const LEVELS: usize> KvPriorityQueue<K, V, LEVELS> {
    /// Creates an empty, unbounded queue.
    pub fn new() -> KvPriorityQueue<K, V, LEVELS> {
        KvPriorityQueue::bounded(0)
    }

    /// Creates an empty queue that admits at most `max_size` entries;
    /// `0` means unbounded. Producers wait while the queue is full.
    pub fn bounded(max_size: u32) -> KvPriorityQueue<K, V, LEVELS> {
        KvPriorityQueue {
            head: Tower::new(LEVELS),
            max_size,
            size: CachePadded::new(AtomicU32::new(0)),
        }
    }

    /// Best-effort entry count. Only eventually accurate under concurrent
    /// updates; never use it as a synchronization barrier.
    pub fn size(&self) -> u32 {
        self.size.load(Ordering::SeqCst)
    }

    /// Whether the bottom level is empty. Like [`size`](KvPriorityQueue::size)
    /// this is best-effort: logically deleted entries that have not been
    /// unlinked yet still count as present.
    pub fn is_empty(&self) -> bool {
        let guard = &epoch::pin();
        self.head.next(0, guard).is_null()
    }
}

impl<K, V, const LEVELS: usize> Default for KvPriorityQueue<K, V, LEVELS> {
    fn default() -> KvPriorityQueue<K, V, LEVELS> {
        KvPriorityQueue::new()
    }
}

impl<K, V, const LEVELS: usize> KvPriorityQueue<K, V, LEVELS>
where
    K: Ord + Clone + Send + 'static,
    V: Clone + Send + 'static,
{
    /// Inserts `value` with the given priority.
    ///
    /// Lock-free on an unbounded queue. On a bounded queue this waits (with
    /// backoff) until the size drops below the bound before inserting.
    pub fn push(&self, priority: K, value: V) {
        self.wait_for_room();

        let height = random_height(LEVELS);
        let guard = &epoch::pin();
        let node = Owned::new(Node::new(priority, value, height)).into_shared(guard);
        let node_ref = unsafe { node.deref() };

        let mut preds: [&Tower<K, V>; LEVELS] = [&self.head; LEVELS];
        let mut succs: [Shared<'_, Node<K, V>>; LEVELS] = [Shared::null(); LEVELS];

        loop {
            self.locate(&node_ref.priority, &mut preds, &mut succs, guard);
            for level in 0..height {
                node_ref.tower.set_next(level, succs[level]);
            }
            // Bottom-level commit. After this CAS the node is in the list.
            if preds[0].cas_next(0, succs[0], node, guard) {
                break;
            }
        }

        for level in 1..height {
            loop {
                if preds[level].cas_next(level, succs[level], node, guard) {
                    break;
                }
                // Stale position. Refresh the search result and re-point the
                // node's own link at this level before retrying; unlike the
                // bottom level, failure here never undoes the commit.
                self.locate(&node_ref.priority, &mut preds, &mut succs, guard);
                node_ref.tower.set_next(level, succs[level]);
            }
        }

        fail_point!("push_before_publish");
        node_ref.set_done_inserting();
        self.size.fetch_add(1, Ordering::SeqCst);
    }

    /// Inserts a default payload with the given priority.
    pub fn push_default(&self, priority: K)
    where
        V: Default,
    {
        self.push(priority, V::default());
    }

    /// Removes a minimum entry and returns its priority and payload.
    ///
    /// Returns `None` when the queue is empty, when the minimum candidate is
    /// still being inserted, or when the deletion race was lost to another
    /// consumer. The cases are indistinguishable; callers that expected an
    /// entry simply retry.
    pub fn try_pop(&self) -> Option<(K, V)> {
        let guard = &epoch::pin();

        let first = self.find_first(guard);
        let first_ref = unsafe { first.as_ref() }?;
        fail_point!("pop_candidate_found");
        if first_ref.is_inserting() {
            return None;
        }

        // Tear down the upper levels first so helpers can start unlinking
        // them. None of these marks commits the deletion.
        for level in (1..first_ref.height()).rev() {
            first_ref.tower.set_mark(level, guard);
        }

        let succ = first_ref.tower.next(0, guard);
        let priority = first_ref.priority.clone();
        let data = first_ref.data.clone();

        // The commit: a single CAS marking the bottom link. If it fails,
        // another consumer won the node or a push linked a new successor in
        // between; either way this pop did not happen.
        if first_ref.tower.try_set_mark(0, succ, guard) {
            self.size.fetch_sub(1, Ordering::SeqCst);
            Some((priority, data))
        } else {
            None
        }
    }

    /// Finds, per level, the last predecessor with priority `< priority`
    /// and the first successor with priority `>= priority` (or null).
    ///
    /// Marked nodes encountered on the way are physically unlinked. If such
    /// a helping CAS fails, another thread raced the structure and the
    /// position arrays can no longer be made mutually consistent, so the
    /// whole search restarts from the head.
    fn locate<'g>(
        &'g self,
        priority: &K,
        preds: &mut [&'g Tower<K, V>; LEVELS],
        succs: &mut [Shared<'g, Node<K, V>>; LEVELS],
        guard: &'g Guard,
    ) {
        'search: loop {
            let mut pred: &'g Tower<K, V> = &self.head;
            for level in (0..LEVELS).rev() {
                let mut current = pred.next(level, guard);
                loop {
                    let curr_ref = match unsafe { current.as_ref() } {
                        Some(c) => c,
                        None => break,
                    };
                    let (succ, marked) = curr_ref.tower.next_and_mark(level, guard);
                    if marked {
                        if pred.cas_next(level, current, succ, guard) {
                            unsafe { Node::release(current, guard) };
                            current = succ;
                            continue;
                        }
                        continue 'search;
                    }
                    if curr_ref.priority < *priority {
                        pred = &curr_ref.tower;
                        current = succ;
                    } else {
                        break;
                    }
                }
                preds[level] = pred;
                succs[level] = current;
            }
            return;
        }
    }

    /// Returns the first unmarked node on the bottom level, unlinking any
    /// marked nodes found directly behind the head on the way down. Null
    /// when the list is empty.
    fn find_first<'g>(&self, guard: &'g Guard) -> Shared<'g, Node<K, V>> {
        'search: loop {
            for level in (0..LEVELS).rev() {
                let mut current = self.head.next(level, guard);
                loop {
                    let curr_ref = match unsafe { current.as_ref() } {
                        Some(c) => c,
                        None => break,
                    };
                    let (succ, marked) = curr_ref.tower.next_and_mark(level, guard);
                    if !marked {
                        break;
                    }
                    if self.head.cas_next(level, current, succ, guard) {
                        unsafe { Node::release(current, guard) };
                        current = succ;
                    } else {
                        continue 'search;
                    }
                }
                if level == 0 {
                    return current;
                }
            }
        }
    }

    fn wait_for_room(&self) {
        if self.max_size == 0 {
            return;
        }
        let backoff = Backoff::new();
        while self.size.load(Ordering::SeqCst) >= self.max_size {
            backoff.snooze();
        }
    }
}

impl<K, V, const LEVELS: usize> KvPriorityQueue<K, V, LEVELS>
where
    K: fmt::Debug,
    V: fmt::Debug,
{
    /// Renders the queue for inspection, either the bottom level only or
    /// every level. Logically deleted entries are flagged as `(Marked)`.
    ///
    /// The dump is not linearizable with concurrent updates and, unlike the
    /// search routines, performs no helping.
    pub fn dump(&self, all_levels: bool) -> String {
        self.render(all_levels, true)
    }

    pub(crate) fn render(&self, all_levels: bool, show_values: bool) -> String {
        let guard = &epoch::pin();
        let mut out = String::new();
        let max_level = if all_levels { LEVELS - 1 } else { 0 };
        for level in 0..=max_level {
            if all_levels {
                let _ = writeln!(out, "Queue at level {}:", level);
            } else {
                let _ = writeln!(out, "Queue:");
            }
            let mut current = self.head.next(level, guard);
            while let Some(node) = unsafe { current.as_ref() } {
                let (succ, marked) = node.tower.next_and_mark(level, guard);
                if show_values {
                    let _ = write!(out, "\tKey: {:?}, Value: {:?}", node.priority, node.data);
                } else {
                    let _ = write!(out, "\tKey: {:?}", node.priority);
                }
                let _ = if marked {
                    writeln!(out, " (Marked)")
                } else {
                    writeln!(out)
                };
                current = succ;
            }
        }
        out
    }
}

impl<K: fmt::Debug, V: fmt::Debug, const LEVELS: usize> fmt::Display
    for KvPriorityQueue<K, V, LEVELS>
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.render(false, true))
    }
}

impl<K, V, const LEVELS: usize> Drop for KvPriorityQueue<K, V, LEVELS> {
    fn drop(&mut self) {
        // Sole owner at this point, so raw walks are fine. A node may still
        // be linked at several levels; free it when its last remaining link
        // is visited.
        let guard = unsafe { epoch::unprotected() };
        for level in (0..LEVELS).rev() {
            let mut current = self.head.next(level, guard);
            while let Some(node) = unsafe { current.as_ref() } {
                let next = node.tower.next(level, guard);
                if node.drop_link() {
                    drop(unsafe { current.into_owned() });
                }
                current = next;
            }
        }
    }
}

/// A concurrent lock-free priority queue over bare priority keys.
///
/// The key-only counterpart of [`KvPriorityQueue`]; see there for the
/// concurrency contract.
pub struct PriorityQueue<K, const LEVELS: usize = 5> {
    inner: KvPriorityQueue<K, (), LEVELS>,
}

impl<K, const LEVELS: usize> PriorityQueue<K, LEVELS> {
    /// Creates an empty, unbounded queue.
    pub fn new() -> PriorityQueue<K, LEVELS> {
        PriorityQueue {
            inner: KvPriorityQueue::new(),
        }
    }

    /// Creates an empty queue that admits at most `max_size` entries;
    /// `0` means unbounded.
    pub fn bounded(max_size: u32) -> PriorityQueue<K, LEVELS> {
        PriorityQueue {
            inner: KvPriorityQueue::bounded(max_size),
        }
    }

    /// Best-effort entry count.
    pub fn size(&self) -> u32 {
        self.inner.size()
    }

    /// Whether the bottom level is empty (best-effort).
    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }
}

impl<K, const LEVELS: usize> Default for PriorityQueue<K, LEVELS> {
    fn default() -> PriorityQueue<K, LEVELS> {
        PriorityQueue::new()
    }
}

impl<K, const LEVELS: usize> PriorityQueue<K, LEVELS>
where
    K: Ord + Clone + Send + 'static,
{
    /// Inserts a priority.
    pub fn push(&self, priority: K) {
        self.inner.push(priority, ());
    }

    /// Removes and returns a minimum priority. `None` when the queue is
    /// empty, the minimum candidate is still being inserted, or the race
    /// was lost; callers may retry.
    pub fn try_pop(&self) -> Option<K> {
        self.inner.try_pop().map(|(priority, ())| priority)
    }
}

impl<K: fmt::Debug, const LEVELS: usize> PriorityQueue<K, LEVELS> {
    /// Renders the queue for inspection. See [`KvPriorityQueue::dump`].
    pub fn dump(&self, all_levels: bool) -> String {
        self.inner.render(all_levels, false)
    }
}

impl<K: fmt::Debug, const LEVELS: usize> fmt::Display for PriorityQueue<K, LEVELS> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.inner.render(false, false))
    }
}

/// Heights are uniform over `1..=levels`. This deliberately differs from
/// the classical geometric skip-list distribution and puts more nodes on
/// the upper levels.
fn random_height(levels: usize) -> usize {
    rand::thread_rng().gen_range(1..=levels)
}

#[cfg(test)]
impl<K: Ord, V, const LEVELS: usize> KvPriorityQueue<K, V, LEVELS> {
    /// Structural probe for quiescent checks: every level sorted over its
    /// unmarked nodes, and every node present at a level present below it.
    fn assert_structure(&self) {
        use std::collections::HashSet;

        let guard = &epoch::pin();
        let mut live: Vec<HashSet<usize>> = Vec::with_capacity(LEVELS);
        for level in 0..LEVELS {
            let mut seen = HashSet::new();
            let mut prev: Option<&K> = None;
            let mut current = self.head.next(level, guard);
            while let Some(node) = unsafe { current.as_ref() } {
                let (succ, marked) = node.tower.next_and_mark(level, guard);
                if !marked {
                    if let Some(p) = prev {
                        assert!(p <= &node.priority, "level {} out of order", level);
                    }
                    prev = Some(&node.priority);
                    seen.insert(node as *const Node<K, V> as usize);
                }
                current = succ;
            }
            live.push(seen);
        }
        for level in 1..LEVELS {
            assert!(
                live[level].is_subset(&live[level - 1]),
                "node present at level {} but missing at level {}",
                level,
                level - 1
            );
        }
    }
}
