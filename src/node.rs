// Copyright 2026 Skipqueue Project Authors. Licensed under Apache-2.0.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use crossbeam_epoch::{Atomic, Guard, Shared};

/// A tower of marked successor links, one per level.
///
/// Each cell packs the successor pointer and the level's deletion mark into
/// a single `Atomic` with the mark in tag bit 0, so the pair is always read
/// and compared atomically. The head sentinel of a queue is a bare `Tower`
/// with no node around it, which keeps the comparator away from a sentinel
/// key that does not exist.
pub(crate) struct Tower<K, V> {
    links: Box<[Atomic<Node<K, V>>]>,
}

impl<K, V> Tower<K, V> {
    pub(crate) fn new(height: usize) -> Tower<K, V> {
        assert!(height >= 1);
        Tower {
            links: (0..height).map(|_| Atomic::null()).collect(),
        }
    }

    pub(crate) fn height(&self) -> usize {
        self.links.len()
    }

    /// Loads the successor at `level`, stripping the mark.
    pub(crate) fn next<'g>(&self, level: usize, guard: &'g Guard) -> Shared<'g, Node<K, V>> {
        self.links[level].load(Ordering::SeqCst, guard).with_tag(0)
    }

    /// Atomic snapshot of (successor, mark) at `level`.
    pub(crate) fn next_and_mark<'g>(
        &self,
        level: usize,
        guard: &'g Guard,
    ) -> (Shared<'g, Node<K, V>>, bool) {
        let succ = self.links[level].load(Ordering::SeqCst, guard);
        (succ.with_tag(0), succ.tag() == 1)
    }

    /// Plain store of an unmarked successor. Only valid while no other
    /// thread can reach this cell: during initial link setup and when
    /// re-pointing a level that has not been installed yet.
    pub(crate) fn set_next(&self, level: usize, succ: Shared<'_, Node<K, V>>) {
        self.links[level].store(succ.with_tag(0), Ordering::Release);
    }

    /// Swings the link from `expected` to `new`, both unmarked. Fails if the
    /// mark has been set in the meantime, so a successor is never installed
    /// onto a logically dead link.
    pub(crate) fn cas_next<'g>(
        &self,
        level: usize,
        expected: Shared<'g, Node<K, V>>,
        new: Shared<'g, Node<K, V>>,
        guard: &'g Guard,
    ) -> bool {
        self.links[level]
            .compare_exchange(
                expected.with_tag(0),
                new.with_tag(0),
                Ordering::SeqCst,
                Ordering::SeqCst,
                guard,
            )
            .is_ok()
    }

    /// CAS from `(expected, unmarked)` to `(expected, marked)`. This is the
    /// single-CAS deletion commit on level 0.
    pub(crate) fn try_set_mark<'g>(
        &self,
        level: usize,
        expected: Shared<'g, Node<K, V>>,
        guard: &'g Guard,
    ) -> bool {
        self.links[level]
            .compare_exchange(
                expected.with_tag(0),
                expected.with_tag(1),
                Ordering::SeqCst,
                Ordering::SeqCst,
                guard,
            )
            .is_ok()
    }

    /// Latches the mark at `level` regardless of the current successor.
    /// Used for the upper levels during pop, where marking order is not the
    /// commit point.
    pub(crate) fn set_mark(&self, level: usize, guard: &Guard) {
        self.links[level].fetch_or(1, Ordering::SeqCst, guard);
    }
}

/// A skip-list entry.
///
/// `priority` and `data` are immutable after construction. `link_refs`
/// counts the levels the node is still physically linked at; the unlinker
/// that drops the last link hands the node to the epoch collector.
pub(crate) struct Node<K, V> {
    pub(crate) priority: K,
    pub(crate) data: V,
    inserting: AtomicBool,
    link_refs: AtomicUsize,
    pub(crate) tower: Tower<K, V>,
}

impl<K, V> Node<K, V> {
    pub(crate) fn new(priority: K, data: V, height: usize) -> Node<K, V> {
        Node {
            priority,
            data,
            inserting: AtomicBool::new(true),
            link_refs: AtomicUsize::new(height),
            tower: Tower::new(height),
        }
    }

    pub(crate) fn height(&self) -> usize {
        self.tower.height()
    }

    pub(crate) fn is_inserting(&self) -> bool {
        self.inserting.load(Ordering::Acquire)
    }

    pub(crate) fn set_done_inserting(&self) {
        self.inserting.store(false, Ordering::Release);
    }

    /// Releases one physical link after a successful unlink CAS. The call
    /// that releases the last link defers destruction to the collector.
    ///
    /// # Safety
    ///
    /// `node` must point to a live node that was just unlinked at exactly
    /// one level by the caller, under `guard`.
    pub(crate) unsafe fn release(node: Shared<'_, Node<K, V>>, guard: &Guard) {
        let n = node.deref();
        if n.link_refs.fetch_sub(1, Ordering::AcqRel) == 1 {
            guard.defer_destroy(node);
        }
    }

    /// Single-threaded variant of [`release`](Node::release) for the queue's
    /// `Drop`: reports whether the caller just dropped the last link.
    pub(crate) fn drop_link(&self) -> bool {
        self.link_refs.fetch_sub(1, Ordering::Relaxed) == 1
    }
}
