//! §1.1 ambient diagnostics: JSON-shaped introspection for tooling,
//! mirroring the original's `dump`/`stats`/`getbrk` debug commands.
//! Kept entirely read-only — nothing here mutates the heap or evaluator
//! state, so it's safe to call from a REPL command or a signal handler.

use serde_json::{Value as Json, json};

use crate::core::eval::Evaluator;

/// `getbrk`: the arena's current bump pointer and configured ceiling,
/// in bytes.
pub fn brk(ev: &Evaluator) -> Json {
    json!({
        "brk": ev.heap.arena.brk(),
        "max": ev.heap.arena.max(),
    })
}

/// `stats`: a snapshot of heap occupancy alongside the GC scheduler's
/// last-run bookkeeping, the kind of thing a host logs periodically or
/// prints on `SIGUSR1`.
pub fn stats(ev: &Evaluator) -> Json {
    json!({
        "arena": {
            "brk": ev.heap.arena.brk(),
            "max": ev.heap.arena.max(),
            "used_pct": percent(ev.heap.arena.brk(), ev.heap.arena.max()),
        },
        "natives_registered": ev.natives.len(),
        "microtasks_pending": ev.microtasks.len(),
    })
}

/// `dump`: a fuller report, for when `stats` isn't enough — currently
/// the same fields as `stats` plus the filename driving this evaluator,
/// left as a separate entry point so callers can grow it without
/// disturbing `stats`'s stable shape.
pub fn dump(ev: &Evaluator) -> Json {
    json!({
        "filename": ev.filename,
        "stats": stats(ev),
    })
}

fn percent(part: usize, whole: usize) -> f64 {
    if whole == 0 {
        0.0
    } else {
        (part as f64 / whole as f64) * 100.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::heap::Heap;

    #[test]
    fn stats_reports_zero_used_on_a_freshly_created_heap_arena() {
        let ev = Evaluator::new(Heap::new(64 * 1024, 1024 * 1024).unwrap(), "<test>");
        let s = stats(&ev);
        assert_eq!(s["arena"]["brk"], 0);
    }

    #[test]
    fn dump_nests_the_stats_object_and_carries_the_filename() {
        let ev = Evaluator::new(Heap::new(64 * 1024, 1024 * 1024).unwrap(), "diag.js");
        let d = dump(&ev);
        assert_eq!(d["filename"], "diag.js");
        assert!(d["stats"]["arena"].is_object());
    }
}
