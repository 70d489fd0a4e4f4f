//! Priority-based preemptive thread scheduler.
//!
//! One static [`Tcb`] per declared thread (see [`crate::boot`]), a
//! per-priority FIFO ready list backed by the [`PrioBitmap`], and a small
//! explicit state machine. All of this is a generalization of the teacher
//! crate's `task.rs`/`readyqueue.rs` pair away from its `Traits`-generic,
//! hunk-addressed threads toward a single concrete registry of statically
//! allocated [`Tcb`]s addressed by plain array index.

use core::cell::Cell;

use crate::cfg::{MAX_PRIORITY, MAX_TASKS, PRIORITY_NONE};
use crate::error::{Component, Reason, StatusWord};
use crate::hw::{CriticalSection, Port};
use crate::list::{End, List, Node};
use crate::registry::{Id, Kind};
use crate::timeout::{TimeoutAction, TimeoutNode};
use crate::utils::bitmap::PrioBitmap;

/// A thread's lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    /// Never activated, or exited; not scheduled.
    Dormant,
    /// On a priority ready list, waiting for [`pick_next`] to select it.
    Ready,
    /// Currently executing.
    Running,
    /// Blocked on a synchronization primitive, a sleep, or a timeout.
    Blocked,
    /// Activated but held off the ready list by [`suspend`].
    Suspended,
    /// Exited by [`exit_trigger`]; control block retained, not reused
    /// (threads are static — see spec non-goal on dynamic creation).
    Exited,
}

/// Why a blocked thread was resumed. A closed enum dispatched by `match`
/// rather than the reference implementation's function-pointer callbacks,
/// since the blocking sites in this crate are a small fixed set and Rust's
/// type system makes the exhaustive-match style cheap to get right.
#[derive(Debug, Clone, Copy)]
pub enum WakeReason {
    /// The condition the thread was waiting for became true.
    Satisfied,
    /// The blocking call's timeout elapsed first.
    TimedOut,
    /// The thread was woken by an explicit interrupt request.
    Interrupted,
}

/// Static thread control block. One instance per declared thread, indexed
/// by [`Id`] into [`REGISTRY`].
pub struct Tcb {
    ready_node: Node,
    pub(crate) timeout: TimeoutNode,
    base_priority: Cell<u8>,
    effective_priority: Cell<u8>,
    state: Cell<State>,
    wake_reason: Cell<Option<WakeReason>>,
    sp: Cell<*mut u8>,
    stack_bottom: Cell<*mut u8>,
    stack_top: Cell<*mut u8>,
    stack_bytes: Cell<usize>,
    entry: Cell<Option<fn(usize)>>,
    entry_arg: Cell<usize>,
}

// Safety: every `Tcb` lives in a `'static` array and is only ever touched
// while holding the kernel's critical section.
unsafe impl Sync for Tcb {}

impl Tcb {
    pub const fn new() -> Self {
        Tcb {
            ready_node: Node::new(),
            timeout: TimeoutNode::new(),
            base_priority: Cell::new(PRIORITY_NONE),
            effective_priority: Cell::new(PRIORITY_NONE),
            state: Cell::new(State::Dormant),
            wake_reason: Cell::new(None),
            sp: Cell::new(core::ptr::null_mut()),
            stack_bottom: Cell::new(core::ptr::null_mut()),
            stack_top: Cell::new(core::ptr::null_mut()),
            stack_bytes: Cell::new(0),
            entry: Cell::new(None),
            entry_arg: Cell::new(0),
        }
    }

    pub fn state(&self) -> State {
        self.state.get()
    }

    pub fn priority(&self) -> u8 {
        self.effective_priority.get()
    }

    pub fn base_priority(&self) -> u8 {
        self.base_priority.get()
    }
}

impl Default for Tcb {
    fn default() -> Self {
        Self::new()
    }
}

static TASKS: [Tcb; MAX_TASKS] = {
    const INIT: Tcb = Tcb::new();
    [INIT; MAX_TASKS]
};

fn tcb(index: usize) -> &'static Tcb {
    &TASKS[index]
}

struct Scheduler {
    ready: [List; MAX_PRIORITY],
    bitmap: PrioBitmap,
    current: Cell<Option<usize>>,
    idle_index: Cell<Option<usize>>,
}

// Safety: single-core, all access happens under the kernel's critical
// section.
unsafe impl Sync for Scheduler {}

impl Scheduler {
    const fn new() -> Self {
        const EMPTY: List = List::new();
        Scheduler {
            ready: [EMPTY; MAX_PRIORITY],
            bitmap: PrioBitmap::new(),
            current: Cell::new(None),
            idle_index: Cell::new(None),
        }
    }
}

static SCHED: Scheduler = Scheduler::new();

/// Registers `index` as the idle thread, run whenever no other thread is
/// ready. Called once from [`crate::boot`].
pub fn set_idle_task(index: usize) {
    SCHED.idle_index.set(Some(index));
}

/// Index of the currently running thread, if the scheduler has started.
pub fn current() -> Option<usize> {
    SCHED.current.get()
}

/// Declares a static thread at `index` with the given base priority, entry
/// point and stack. Called from [`crate::boot`] during static init; not a
/// general-purpose "spawn" (spec non-goal: no dynamic thread creation).
pub fn declare<P: Port>(index: usize, priority: u8, entry: fn(usize), arg: usize, stack: &mut [u8]) {
    let t = tcb(index);
    t.base_priority.set(priority);
    t.effective_priority.set(priority);
    t.entry.set(Some(entry));
    t.entry_arg.set(arg);
    stack.fill(crate::cfg::STACK_PAINT_BYTE);
    let stack_bytes = stack.len();
    let stack_bottom = stack.as_mut_ptr();
    let stack_top = unsafe { stack_bottom.add(stack_bytes) };
    t.stack_bottom.set(stack_bottom);
    t.stack_top.set(stack_top);
    t.stack_bytes.set(stack_bytes);
    let sp = P::stack_frame_init(entry_trampoline, stack_top, stack_bytes, index);
    t.sp.set(sp);
    entry_trigger(index);
}

/// The real thread entry point never runs directly; every thread starts
/// here so its exit path is always `exit_trigger`, matching the spec's
/// closed entry/exit pair.
fn entry_trampoline(_index: usize) {
    unreachable!("context_switch lands threads in port-specific trampolines")
}

/// Moves a declared-but-dormant thread onto its priority's ready list.
pub fn entry_trigger(index: usize) {
    let t = tcb(index);
    debug_assert_eq!(t.state.get(), State::Dormant);
    t.state.set(State::Ready);
    push_ready(index);
}

/// Runs when a thread's entry function returns. Removes it from scheduling
/// permanently; the control block is retained (for [`crate::trace`]) but
/// never reused, per the spec's static-allocation invariant.
pub fn exit_trigger<P: Port>(index: usize) {
    let _cs = CriticalSection::<P>::enter();
    let t = tcb(index);
    t.state.set(State::Exited);
    if SCHED.current.get() == Some(index) {
        SCHED.current.set(None);
    }
    P::trigger_reschedule();
}

fn push_ready(index: usize) {
    let t = tcb(index);
    let prio = t.effective_priority.get();
    SCHED.ready[prio as usize].push(&t.ready_node, End::Tail);
    SCHED.bitmap.set(prio);
}

fn remove_ready(index: usize) {
    let t = tcb(index);
    let prio = t.effective_priority.get();
    SCHED.ready[prio as usize].remove(&t.ready_node);
    if SCHED.ready[prio as usize].is_empty() {
        SCHED.bitmap.clear(prio);
    }
}

/// Selects the next thread to run: the head of the highest-priority
/// non-empty ready list, or the idle thread if none is ready.
pub fn pick_next() -> usize {
    match SCHED.bitmap.highest() {
        Some(prio) => {
            let front = SCHED.ready[prio as usize]
                .front()
                .expect("bitmap bit set implies non-empty list");
            index_of(front)
        }
        None => SCHED
            .idle_index
            .get()
            .expect("idle task must be registered before scheduling starts"),
    }
}

fn index_of(node: core::ptr::NonNull<Node>) -> usize {
    let base = TASKS.as_ptr();
    let node_ptr = node.as_ptr() as *const Node;
    // Safety: `node` always points at some `Tcb::ready_node`, and
    // `ready_node` is `Tcb`'s first field.
    unsafe {
        let tcb_ptr = node_ptr as *const Tcb;
        tcb_ptr.offset_from(base) as usize
    }
}

/// Removes `index` from the ready list and marks it `Running`, recording it
/// as the current thread. Called by the port's context-switch glue.
pub fn enter_run(index: usize) {
    let t = tcb(index);
    remove_ready(index);
    t.state.set(State::Running);
    SCHED.current.set(Some(index));
}

/// Moves the current thread back onto its ready list (e.g. at the end of
/// its time slice) or to `Blocked` (e.g. entering a wait).
pub fn leave_run(index: usize, next_state: State) {
    let t = tcb(index);
    t.state.set(next_state);
    if next_state == State::Ready {
        push_ready(index);
    }
    if SCHED.current.get() == Some(index) {
        SCHED.current.set(None);
    }
}

/// A thread's own declared (non-inherited) priority — the floor its
/// effective priority is restored to once it no longer owns any mutex.
pub fn resolve_priority_floor(index: usize) -> u8 {
    tcb(index).base_priority.get()
}

/// A thread's current effective priority, possibly raised above its base
/// priority by mutex priority inheritance.
pub fn effective_priority_of(index: usize) -> u8 {
    tcb(index).effective_priority.get()
}

/// Raises (or restores) `index`'s effective priority, re-homing it on the
/// ready list if it's currently queued there. Used by the mutex's priority
/// inheritance.
pub fn set_effective_priority(index: usize, new_priority: u8) {
    let t = tcb(index);
    if t.state.get() == State::Ready {
        remove_ready(index);
        t.effective_priority.set(new_priority);
        push_ready(index);
    } else {
        t.effective_priority.set(new_priority);
    }
}

/// Blocks the current thread, arming `timeout_us` (or leaving it waiting
/// forever if `timeout_us == FOREVER_US`). Returns the [`WakeReason`] once
/// some other execution of the kernel resumes it.
pub fn block<P: Port>(index: usize, timeout_us: u32) {
    let t = tcb(index);
    t.wake_reason.set(None);
    leave_run(index, State::Blocked);
    if timeout_us != crate::cfg::FOREVER_US {
        crate::timer::wheel().schedule::<P>(&t.timeout, timeout_us, TimeoutAction::WakeTask(index));
    }
    P::trigger_reschedule();
}

/// Resumes a blocked thread with the given reason, canceling any pending
/// timeout. Idempotent: resuming an already-ready/running thread is a
/// no-op, since two wake sources (e.g. a signal racing a timeout) can both
/// observe the same blocked thread before the scheduler runs again.
pub fn wake<P: Port>(index: usize, reason: WakeReason) {
    let t = tcb(index);
    if t.state.get() != State::Blocked {
        return;
    }
    crate::timer::wheel().cancel(&t.timeout);
    t.wake_reason.set(Some(reason));
    t.state.set(State::Ready);
    push_ready(index);
    P::trigger_reschedule();
}

/// Called by the timeout wheel's expiry walk for a `WakeTask` action.
pub fn on_timeout_expired<P: Port>(index: usize) {
    let t = tcb(index);
    if t.state.get() == State::Blocked {
        t.wake_reason.set(Some(WakeReason::TimedOut));
        t.state.set(State::Ready);
        push_ready(index);
        P::trigger_reschedule();
    }
}

/// Takes (and clears) the wake reason recorded for `index` by the last
/// [`wake`]/[`on_timeout_expired`] call.
pub fn take_wake_reason(index: usize) -> WakeReason {
    tcb(index).wake_reason.take().unwrap_or(WakeReason::Satisfied)
}

/// Suspends a thread off the ready list regardless of its current queued
/// state. The thread resumes where it left off once [`resume`] is called.
pub fn suspend(index: usize) -> StatusWord {
    let t = tcb(index);
    match t.state.get() {
        State::Ready => {
            remove_ready(index);
            t.state.set(State::Suspended);
            StatusWord::ok()
        }
        State::Running | State::Blocked => {
            t.state.set(State::Suspended);
            StatusWord::ok()
        }
        _ => StatusWord::err(Component::Scheduler, Reason::BadParam),
    }
}

pub fn resume(index: usize) -> StatusWord {
    let t = tcb(index);
    if t.state.get() != State::Suspended {
        return StatusWord::err(Component::Scheduler, Reason::BadParam);
    }
    t.state.set(State::Ready);
    push_ready(index);
    StatusWord::ok()
}

/// Suspends the current thread for `duration_us`, an explicit suspension
/// point (spec: sleep has no wake source but its own timeout). `0` returns
/// immediately without ever leaving `Running`.
pub fn sleep<P: Port>(duration_us: u32) -> StatusWord {
    if duration_us == 0 {
        return StatusWord::ok();
    }
    let Some(cur) = current() else {
        return StatusWord::err(Component::Scheduler, Reason::WouldBlock);
    };
    block::<P>(cur, duration_us);
    match take_wake_reason(cur) {
        // Nothing else wakes a pure sleep, so its own timeout firing is the
        // expected, successful outcome rather than a failure.
        WakeReason::TimedOut | WakeReason::Satisfied => StatusWord::ok(),
        WakeReason::Interrupted => StatusWord::interrupted(Component::Scheduler),
    }
}

/// Moves the current thread to the tail of its own priority's ready list,
/// giving any same-priority peer a turn, then requests a reschedule. A
/// thread with no peers at its priority simply keeps running.
pub fn yield_now<P: Port>() -> StatusWord {
    let _cs = CriticalSection::<P>::enter();
    let Some(cur) = current() else {
        return StatusWord::err(Component::Scheduler, Reason::WouldBlock);
    };
    leave_run(cur, State::Ready);
    P::trigger_reschedule();
    StatusWord::ok()
}

/// Resolves a task [`Id`] to its control block index, validating its kind
/// and liveness.
pub fn resolve(id: Id) -> Option<usize> {
    let idx = id.checked_index(Kind::Task)?;
    if idx >= MAX_TASKS {
        return None;
    }
    Some(idx)
}

/// Recovers a `'static` reference to a thread's stack pointer slot, for the
/// port's context-switch assembly glue.
pub fn sp_slot(index: usize) -> &'static Cell<*mut u8> {
    &tcb(index).sp
}

/// A declared thread's stack region as `(bottom, len)`, for
/// [`crate::trace`]'s high-water-mark scan.
pub fn stack_region(index: usize) -> (*const u8, usize) {
    let t = tcb(index);
    (t.stack_bottom.get(), t.stack_bytes.get())
}

/// Number of threads currently queued ready at `priority`, for
/// [`crate::trace`].
pub fn ready_count(priority: u8) -> usize {
    SCHED.ready[priority as usize].iter().count()
}

/// `(state, base_priority, effective_priority)` for a declared thread, for
/// [`crate::trace`]. `None` if `index` was never declared.
pub fn thread_meta(index: usize) -> Option<(State, u8, u8)> {
    let t = tcb(index);
    if t.state.get() == State::Dormant && t.base_priority.get() == PRIORITY_NONE {
        return None;
    }
    Some((t.state.get(), t.base_priority.get(), t.effective_priority.get()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hw::test_port::TestPort;

    fn reset() {
        for t in TASKS.iter() {
            t.state.set(State::Dormant);
            t.base_priority.set(PRIORITY_NONE);
            t.effective_priority.set(PRIORITY_NONE);
        }
        for list in SCHED.ready.iter() {
            while list.pop_front().is_some() {}
        }
        SCHED.current.set(None);
    }

    #[test]
    fn pick_next_prefers_highest_priority() {
        reset();
        tcb(0).effective_priority.set(5);
        tcb(1).effective_priority.set(2);
        entry_trigger(0);
        entry_trigger(1);
        assert_eq!(pick_next(), 1);
    }

    #[test]
    fn fifo_within_same_priority() {
        reset();
        tcb(0).effective_priority.set(3);
        tcb(1).effective_priority.set(3);
        entry_trigger(0);
        entry_trigger(1);
        assert_eq!(pick_next(), 0);
        enter_run(0);
        leave_run(0, State::Ready);
        assert_eq!(pick_next(), 1);
    }

    #[test]
    fn wake_is_idempotent_for_non_blocked_thread() {
        reset();
        tcb(2).effective_priority.set(1);
        tcb(2).state.set(State::Ready);
        wake::<TestPort>(2, WakeReason::Interrupted);
        assert_eq!(tcb(2).state.get(), State::Ready);
    }

    #[test]
    fn sleep_of_zero_returns_immediately_without_blocking() {
        reset();
        tcb(3).effective_priority.set(1);
        SCHED.current.set(Some(3));
        tcb(3).state.set(State::Running);
        assert!(sleep::<TestPort>(0).is_ok());
        assert_eq!(tcb(3).state.get(), State::Running);
    }

    #[test]
    fn yield_now_requeues_current_thread_as_ready() {
        reset();
        tcb(4).effective_priority.set(1);
        SCHED.current.set(Some(4));
        tcb(4).state.set(State::Running);
        assert!(yield_now::<TestPort>().is_ok());
        assert_eq!(tcb(4).state.get(), State::Ready);
        assert_eq!(pick_next(), 4);
    }
}
