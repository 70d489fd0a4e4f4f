//! Read-only introspection: scheduler, per-thread and timeout-wheel
//! snapshots for a debugger or a diagnostic thread to poll.
//!
//! Every snapshot function holds its critical section only long enough to
//! copy out plain data — never while formatting, logging, or returning
//! across a call a caller might block in.

use crate::cfg::MAX_PRIORITY;
use crate::cfg::STACK_PAINT_BYTE;
use crate::hw::{CriticalSection, Port};
use crate::task::{self, State};

/// A point-in-time view of the ready queue.
pub struct SchedulerSnapshot {
    pub current: Option<usize>,
    pub ready_counts: [usize; MAX_PRIORITY],
}

pub fn scheduler_snapshot<P: Port>() -> SchedulerSnapshot {
    let _cs = CriticalSection::<P>::enter();
    let mut ready_counts = [0usize; MAX_PRIORITY];
    for (prio, count) in ready_counts.iter_mut().enumerate() {
        *count = task::ready_count(prio as u8);
    }
    SchedulerSnapshot {
        current: task::current(),
        ready_counts,
    }
}

/// A point-in-time view of one thread.
pub struct ThreadSnapshot {
    pub state: State,
    pub base_priority: u8,
    pub effective_priority: u8,
    /// Estimated worst-case bytes of stack ever used, derived from how much
    /// of the stack-paint pattern written at [`crate::boot::run`] time has
    /// been overwritten. An estimate, not an exact count: a thread whose
    /// deepest call happened to write back the paint byte understates its
    /// own usage.
    pub stack_high_water_mark: usize,
}

pub fn thread_snapshot<P: Port>(index: usize) -> Option<ThreadSnapshot> {
    let _cs = CriticalSection::<P>::enter();
    let (state, base_priority, effective_priority) = task::thread_meta(index)?;
    let stack_high_water_mark = stack_high_water_mark(index);
    Some(ThreadSnapshot {
        state,
        base_priority,
        effective_priority,
        stack_high_water_mark,
    })
}

/// Percentage (0-100) of a declared thread's stack the high-water mark has
/// ever covered. `None` if `index` was never declared or has no stack.
pub fn percent_used<P: Port>(index: usize) -> Option<u8> {
    let _cs = CriticalSection::<P>::enter();
    task::thread_meta(index)?;
    let (_, len) = task::stack_region(index);
    if len == 0 {
        return None;
    }
    let used = stack_high_water_mark(index);
    Some(((used * 100) / len).min(100) as u8)
}

fn stack_high_water_mark(index: usize) -> usize {
    let (bottom, len) = task::stack_region(index);
    if bottom.is_null() || len == 0 {
        return 0;
    }
    // Safety: `bottom`/`len` describe a stack declared via `task::declare`,
    // which paints the whole region before the thread ever runs; no other
    // code retains a mutable reference to it while we hold the critical
    // section.
    let region = unsafe { core::slice::from_raw_parts(bottom, len) };
    let untouched = region.iter().take_while(|&&b| b == STACK_PAINT_BYTE).count();
    len - untouched
}

/// A point-in-time view of the tickless timeout wheel.
pub struct TimeoutSnapshot {
    pub armed_count: usize,
    pub head_duration_us: Option<u32>,
}

pub fn timeout_snapshot<P: Port>() -> TimeoutSnapshot {
    let _cs = CriticalSection::<P>::enter();
    let wheel = crate::timer::wheel();
    TimeoutSnapshot {
        armed_count: wheel.armed_count(),
        head_duration_us: wheel.head_duration_us(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hw::test_port::TestPort;

    #[test]
    fn timeout_snapshot_is_consistent_with_armed_count() {
        let snap = timeout_snapshot::<TestPort>();
        assert_eq!(snap.armed_count == 0, snap.head_duration_us.is_none());
    }

    #[test]
    fn scheduler_snapshot_counts_ready_threads_per_priority() {
        let snap = scheduler_snapshot::<TestPort>();
        assert_eq!(snap.ready_counts.len(), MAX_PRIORITY);
    }

    #[test]
    fn percent_used_is_none_for_an_undeclared_thread() {
        assert!(percent_used::<TestPort>(crate::cfg::MAX_TASKS - 1).is_none());
    }
}
