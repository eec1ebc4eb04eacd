//! §4.E Compacting garbage collector.
//!
//! A Cheney-style copying collector that compacts the single arena in
//! place: live data is copied into a scratch buffer in root-reachable
//! order, then the scratch buffer is copied back over the arena and
//! `brk` shrinks to the live size. Object identity (offsets embedded in
//! `Value`s) is kept consistent via a forwarding table built during the
//! reserve phase and consulted during the update phase.
//!
//! Grounded directly on the distilled original's `src/gc.c`: the
//! open-addressed forwarding table with `FWD_EMPTY`/`FWD_TOMBSTONE`
//! sentinels and 70% load factor, the explicit work-queue (rather than
//! recursive marking, to bound native stack depth on deep object graphs),
//! and the four-phase reserve/scan/update/copy structure.

use std::time::{Duration, Instant};

use crate::core::arena::Arena;
use crate::core::value::{Tag, Value};
use crate::error::JSError;

const FWD_EMPTY: u32 = u32::MAX;
const FWD_TOMBSTONE: u32 = u32::MAX - 1;
const FWD_LOAD_FACTOR_PCT: u64 = 70;

/// Open-addressed offset -> offset map used to track where each live
/// heap value was relocated to during a collection.
struct ForwardTable {
    old_offs: Vec<u32>,
    new_offs: Vec<u32>,
    count: usize,
    mask: usize,
}

impl ForwardTable {
    fn new(capacity_hint: usize) -> ForwardTable {
        let cap = next_pow2(capacity_hint.max(16));
        ForwardTable { old_offs: vec![FWD_EMPTY; cap], new_offs: vec![0; cap], count: 0, mask: cap - 1 }
    }

    fn should_grow(&self) -> bool {
        (self.count as u64 + 1) * 100 >= (self.old_offs.len() as u64) * FWD_LOAD_FACTOR_PCT
    }

    fn grow(&mut self) {
        let new_cap = self.old_offs.len() * 2;
        let mut grown = ForwardTable::new(new_cap);
        for i in 0..self.old_offs.len() {
            if self.old_offs[i] != FWD_EMPTY && self.old_offs[i] != FWD_TOMBSTONE {
                grown.add(self.old_offs[i], self.new_offs[i]);
            }
        }
        *self = grown;
    }

    fn add(&mut self, old: u32, new: u32) {
        if self.should_grow() {
            self.grow();
        }
        let mut idx = (old as usize) & self.mask;
        loop {
            if self.old_offs[idx] == FWD_EMPTY || self.old_offs[idx] == FWD_TOMBSTONE {
                self.old_offs[idx] = old;
                self.new_offs[idx] = new;
                self.count += 1;
                return;
            }
            idx = (idx + 1) & self.mask;
        }
    }

    fn lookup(&self, old: u32) -> Option<u32> {
        let mut idx = (old as usize) & self.mask;
        let mut probes = 0;
        while probes <= self.mask {
            match self.old_offs[idx] {
                FWD_EMPTY => return None,
                FWD_TOMBSTONE => {}
                o if o == old => return Some(self.new_offs[idx]),
                _ => {}
            }
            idx = (idx + 1) & self.mask;
            probes += 1;
        }
        None
    }
}

fn next_pow2(n: usize) -> usize {
    let mut p = 1usize;
    while p < n {
        p <<= 1;
    }
    p
}

/// An explicit stack of pending (offset, tag) pairs, replacing recursive
/// marking so GC work depth is bounded only by heap size, not native call
/// depth.
struct WorkQueue {
    stack: Vec<(u32, Tag)>,
}

impl WorkQueue {
    fn new() -> WorkQueue {
        WorkQueue { stack: Vec::new() }
    }
    fn push(&mut self, off: u32, tag: Tag) {
        self.stack.push((off, tag));
    }
    fn pop(&mut self) -> Option<(u32, Tag)> {
        self.stack.pop()
    }
}

/// Everything the collector needs to find roots, supplied by the
/// embedder/evaluator at GC time. Each trait method is called once per
/// collection and should invoke `visit` for every [`Value`] the caller
/// wants kept alive and rewritten.
pub trait RootSource {
    fn visit_roots(&self, visit: &mut dyn FnMut(Value));
    /// Called once per root after relocation, in the same enumeration
    /// order as `visit_roots`, so the caller can write the updated value
    /// back into whatever storage it came from.
    fn update_roots(&mut self, updated: &[Value]);
}

/// Per-value-kind tracing, supplied by the object/string layer so the GC
/// core stays generic over what heap node shapes exist.
pub trait HeapTracer {
    /// Copy the node at `old_off` (of the given tag) into `scratch` at
    /// its current length, returning the new offset and this node's
    /// child offsets (each tagged with its own kind, since a single
    /// collection can mix string and object-shaped nodes in the same
    /// work queue) that must themselves be traced.
    fn copy_node(&self, arena: &Arena, tag: Tag, old_off: u32, scratch: &mut Vec<u8>) -> (u32, Vec<(u32, Tag)>);
    /// Rewrite any embedded child offsets inside the node now living at
    /// `new_off` in `scratch`, using `table` to translate old -> new.
    fn relocate_children(&self, scratch: &mut [u8], tag: Tag, new_off: u32, table: &ForwardTableView);
}

/// Read-only view of the forward table handed to [`HeapTracer::relocate_children`].
pub struct ForwardTableView<'a>(&'a ForwardTable);
impl ForwardTableView<'_> {
    pub fn translate(&self, old: u32) -> u32 {
        self.0.lookup(old).unwrap_or(old)
    }
}

pub struct GcStats {
    pub bytes_before: usize,
    pub bytes_after: usize,
    pub objects_relocated: usize,
    pub duration: Duration,
}

/// GC scheduling policy (§4.E "cooldown" / "forbidden while a coroutine is
/// running"). The evaluator consults this before every potential
/// allocation site; while a coroutine's fiber is on the stack, collection
/// is deferred and `needs_gc` latches until the next safe point.
pub struct GcScheduler {
    last_run: Option<Instant>,
    needs_gc: bool,
    coroutine_depth: u32,
}

impl Default for GcScheduler {
    fn default() -> Self {
        GcScheduler { last_run: None, needs_gc: false, coroutine_depth: 0 }
    }
}

impl GcScheduler {
    pub fn enter_coroutine(&mut self) {
        self.coroutine_depth += 1;
    }

    pub fn leave_coroutine(&mut self) {
        self.coroutine_depth = self.coroutine_depth.saturating_sub(1);
    }

    pub fn request_gc(&mut self) {
        self.needs_gc = true;
    }

    /// `gc_trigger_threshold(brk)` — §3.1: `max(2MiB, min(16MiB, brk/4))`.
    pub fn trigger_threshold(brk: usize) -> usize {
        (brk / 4).clamp(2 * 1024 * 1024, 16 * 1024 * 1024)
    }

    fn cooldown(brk: usize) -> Duration {
        if brk <= 16 * 1024 * 1024 { Duration::from_millis(1000) } else { Duration::from_millis(500) }
    }

    /// True if a collection should run now: either the deferred flag is
    /// set and we're no longer inside a coroutine, or growth since the
    /// last run has crossed the threshold and the cooldown has elapsed.
    pub fn should_collect(&mut self, brk: usize, bytes_since_last: usize, now: Instant) -> bool {
        if self.coroutine_depth > 0 {
            if bytes_since_last >= Self::trigger_threshold(brk) {
                self.needs_gc = true;
            }
            return false;
        }
        if self.needs_gc {
            return true;
        }
        if bytes_since_last < Self::trigger_threshold(brk) {
            return false;
        }
        match self.last_run {
            None => true,
            Some(t) => now.duration_since(t) >= Self::cooldown(brk),
        }
    }

    pub fn mark_ran(&mut self, now: Instant) {
        self.last_run = Some(now);
        self.needs_gc = false;
    }
}

/// Run one full collection: reserve (copy + forward + enqueue children),
/// scan (drain the work queue), update (rewrite roots and all relocated
/// children), copy (scratch buffer back over the arena, shrink `brk`).
///
/// Returns an error only if the scratch buffer would itself exceed the
/// arena's configured maximum (a pathological case — the copy phase
/// never allocates *more* than the live set already occupied).
pub fn collect(arena: &mut Arena, roots: &mut dyn RootSource, tracer: &dyn HeapTracer) -> Result<GcStats, JSError> {
    let start = Instant::now();
    let bytes_before = arena.brk();

    let mut table = ForwardTable::new((bytes_before / 64).max(32));
    let mut queue = WorkQueue::new();
    let mut scratch: Vec<u8> = Vec::with_capacity(bytes_before);
    let mut relocated = 0usize;

    let mut seed_offsets: Vec<(u32, Tag)> = Vec::new();
    roots.visit_roots(&mut |v| {
        if v.type_tag().is_heap() {
            seed_offsets.push((v.offset(), v.type_tag()));
        }
    });

    // Every offset entering the queue carries its tag alongside it so the
    // tracer can be consulted without a second lookup; `reserve_one`
    // never recurses, so depth is bounded by heap size, not call stack.
    let mut pending: Vec<(u32, Tag)> = Vec::new();
    for (off, tag) in &seed_offsets {
        pending.push((*off, *tag));
    }
    let mut new_with_tag: Vec<(u32, Tag)> = Vec::new();

    while !pending.is_empty() {
        for (old_off, tag) in pending.drain(..) {
            if table.lookup(old_off).is_some() {
                continue;
            }
            let (new_off, children) = tracer.copy_node(arena, tag, old_off, &mut scratch);
            table.add(old_off, new_off);
            relocated += 1;
            new_with_tag.push((new_off, tag));
            for (child_off, child_tag) in children {
                queue.push(child_off, child_tag);
            }
        }
        while let Some((child_off, child_tag)) = queue.pop() {
            if table.lookup(child_off).is_none() {
                pending.push((child_off, child_tag));
            }
        }
    }

    let view = ForwardTableView(&table);
    for (new_off, tag) in &new_with_tag {
        tracer.relocate_children(&mut scratch, *tag, *new_off, &view);
    }

    let mut updated_roots = Vec::new();
    roots.visit_roots(&mut |v| {
        if v.type_tag().is_heap() {
            let new_off = table.lookup(v.offset()).unwrap_or(v.offset());
            updated_roots.push(Value::make(v.type_tag(), new_off as u64));
        } else {
            updated_roots.push(v);
        }
    });
    roots.update_roots(&updated_roots);

    let bytes_after = scratch.len();
    arena.as_mut_slice()[..bytes_after].copy_from_slice(&scratch);
    unsafe {
        arena.set_brk(bytes_after);
    }
    arena.maybe_decommit();

    Ok(GcStats { bytes_before, bytes_after, objects_relocated: relocated, duration: start.elapsed() })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn forward_table_round_trips_and_grows() {
        let mut t = ForwardTable::new(4);
        for i in 0..100u32 {
            t.add(i, i * 2);
        }
        for i in 0..100u32 {
            assert_eq!(t.lookup(i), Some(i * 2));
        }
        assert_eq!(t.lookup(999), None);
    }

    #[test]
    fn trigger_threshold_matches_spec_bounds() {
        assert_eq!(GcScheduler::trigger_threshold(1024), 2 * 1024 * 1024);
        assert_eq!(GcScheduler::trigger_threshold(1024 * 1024 * 1024), 16 * 1024 * 1024);
        assert_eq!(GcScheduler::trigger_threshold(32 * 1024 * 1024), 8 * 1024 * 1024);
    }

    #[test]
    fn gc_is_deferred_while_a_coroutine_is_running() {
        let mut sched = GcScheduler::default();
        sched.enter_coroutine();
        let now = Instant::now();
        assert!(!sched.should_collect(32 * 1024 * 1024, 100 * 1024 * 1024, now));
        sched.leave_coroutine();
        assert!(sched.should_collect(32 * 1024 * 1024, 100 * 1024 * 1024, now));
    }

    #[test]
    fn cooldown_blocks_back_to_back_collections() {
        let mut sched = GcScheduler::default();
        let t0 = Instant::now();
        sched.mark_ran(t0);
        assert!(!sched.should_collect(1024 * 1024, 100 * 1024 * 1024, t0));
    }
}
