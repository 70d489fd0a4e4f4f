//! The hardware port contract and the two things built directly on top of
//! it: the reentrant critical section and the privilege trampoline.
//!
//! Context-switch assembly, stack-frame layout, and the actual supervisor
//! trap are someone else's problem (see spec section 1) — gathered here
//! behind one `'static` trait, `Port`, that the rest of the crate is generic
//! over. This plays the role the teacher crate's `PortThreading`/`Traits`
//! bundle plays, trimmed down to exactly the hooks this core calls.

use crate::error::StatusWord;

/// Everything the core needs from the hardware/board layer. An integrator
/// implements this once for their target and instantiates the kernel types
/// with it.
pub trait Port: 'static {
    /// Masks schedulable interrupts, returning whatever state is needed to
    /// restore them. Must compose under nesting: calling this while already
    /// inside a critical section and later restoring with the returned
    /// value must leave interrupts exactly as they were before the *outer*
    /// call, even though every nested call/restore pair also runs.
    fn enter_critical() -> u32;

    /// Restores the interrupt state captured by a matching [`enter_critical`](Port::enter_critical).
    fn exit_critical(saved: u32);

    /// Requests that the scheduler run at the next safe point. Must be
    /// callable from within a critical section; must not switch context
    /// synchronously.
    fn trigger_reschedule();

    /// Builds the initial stack frame for a not-yet-run thread so that the
    /// first [`context_switch`](Port::context_switch) into it lands in
    /// `entry` as if called with `arg`. Returns the initial stack pointer.
    fn stack_frame_init(entry: fn(usize), stack_top: *mut u8, stack_bytes: usize, arg: usize) -> *mut u8;

    /// Saves the current thread's stack pointer to `*cur_sp_slot` and loads
    /// `next_sp`. Returns only after some thread switches back to the
    /// caller's stack.
    ///
    /// # Safety
    /// `cur_sp_slot` and `next_sp` must both describe stacks previously
    /// produced by [`stack_frame_init`](Port::stack_frame_init) (or a
    /// stack this same thread previously saved via this function).
    unsafe fn context_switch(cur_sp_slot: &mut *mut u8, next_sp: *mut u8);

    /// Monotonic microsecond clock. Wraps after `u64::MAX` us, which no
    /// real target reaches.
    fn now_us() -> u64;

    /// Arms a one-shot hardware timeout `us` microseconds from now.
    /// `us == FOREVER_US` disarms it.
    fn arm_next_interval(us: u32);

    fn in_interrupt() -> bool;
    fn in_thread_mode() -> bool;

    /// Whether the caller is already executing with kernel-mutation
    /// privilege. [`privilege_invoke`] branches on this.
    fn in_privileged_mode() -> bool;

    /// Traps to privileged mode, runs `routine(args)` there under a
    /// critical section, and returns its result. Only called when
    /// [`in_privileged_mode`](Port::in_privileged_mode) is `false`.
    fn privileged_trap(routine: PrivilegedRoutine, args: &ArgPack) -> StatusWord;
}

/// A privileged routine's argument, tagged by shape. Carried in a fixed-size
/// array rather than a boxed closure so the trampoline has no allocator
/// dependency and a calling convention uniform enough to cross a trap
/// handler boundary — the same shape the reference C implementation's
/// `arguments_t arguments[]` convention uses ahead of every
/// `kernel_privilege_invoke` call.
#[derive(Clone, Copy)]
pub enum Arg {
    None,
    U32(u32),
    I32(i32),
    Ptr(*mut ()),
}

impl Arg {
    pub fn as_u32(self) -> u32 {
        match self {
            Arg::U32(v) => v,
            _ => 0,
        }
    }

    pub fn as_i32(self) -> i32 {
        match self {
            Arg::I32(v) => v,
            _ => 0,
        }
    }

    pub fn as_ptr(self) -> *mut () {
        match self {
            Arg::Ptr(p) => p,
            _ => core::ptr::null_mut(),
        }
    }
}

/// Fixed-capacity argument pack. Four slots covers every primitive in this
/// crate (the widest caller, `queue::send`, needs id + payload ptr +
/// to_front flag + timeout).
pub type ArgPack = [Arg; 4];

pub const NO_ARGS: ArgPack = [Arg::None, Arg::None, Arg::None, Arg::None];

pub type PrivilegedRoutine = fn(&ArgPack) -> StatusWord;

/// Routes a state-mutating call through the privilege boundary: directly,
/// under a critical section, if the caller is already privileged; via the
/// hardware trap otherwise.
pub fn privilege_invoke<P: Port>(routine: PrivilegedRoutine, args: ArgPack) -> StatusWord {
    if P::in_privileged_mode() {
        let _guard = CriticalSection::<P>::enter();
        routine(&args)
    } else {
        P::privileged_trap(routine, &args)
    }
}

/// Software nesting depth of the critical section, for diagnostics
/// (`in_critical()`) only — the hardware mask state itself nests correctly
/// on its own via [`Port::enter_critical`]'s save/restore contract.
static CRITICAL_NEST: core::sync::atomic::AtomicU32 = core::sync::atomic::AtomicU32::new(0);

/// Returns whether the current call is nested inside a [`CriticalSection`].
/// Used by callers that must assert they only mutate kernel state while
/// holding it.
pub fn in_critical() -> bool {
    CRITICAL_NEST.load(core::sync::atomic::Ordering::Relaxed) > 0
}

/// RAII critical-section guard. All kernel list/control-block mutation
/// happens while one of these is alive.
pub struct CriticalSection<P: Port> {
    saved: u32,
    _port: core::marker::PhantomData<P>,
}

impl<P: Port> CriticalSection<P> {
    pub fn enter() -> Self {
        let saved = P::enter_critical();
        CRITICAL_NEST.fetch_add(1, core::sync::atomic::Ordering::Relaxed);
        CriticalSection {
            saved,
            _port: core::marker::PhantomData,
        }
    }
}

impl<P: Port> Drop for CriticalSection<P> {
    fn drop(&mut self) {
        CRITICAL_NEST.fetch_sub(1, core::sync::atomic::Ordering::Relaxed);
        P::exit_critical(self.saved);
    }
}

#[cfg(test)]
pub(crate) mod test_port {
    //! A software-simulated [`Port`] for unit tests: no real interrupts, a
    //! manually-advanced clock, and "always privileged" so
    //! [`super::privilege_invoke`] always takes the direct path. Stands in
    //! for hardware the way the spec's test tooling calls for.
    use super::*;
    use core::cell::Cell;
    use core::sync::atomic::{AtomicU64, Ordering};

    pub struct TestPort;

    static NOW_US: AtomicU64 = AtomicU64::new(0);
    static ARMED_US: AtomicU64 = AtomicU64::new(u64::MAX);
    static RESCHEDULE_REQUESTED: core::sync::atomic::AtomicBool =
        core::sync::atomic::AtomicBool::new(false);

    std::thread_local! {
        static MASK_DEPTH: Cell<u32> = const { Cell::new(0) };
    }

    impl TestPort {
        pub fn advance_us(delta: u64) {
            NOW_US.fetch_add(delta, Ordering::SeqCst);
        }

        pub fn reschedule_requested() -> bool {
            RESCHEDULE_REQUESTED.swap(false, Ordering::SeqCst)
        }

        pub fn armed_interval_us() -> u64 {
            ARMED_US.load(Ordering::SeqCst)
        }
    }

    impl Port for TestPort {
        fn enter_critical() -> u32 {
            MASK_DEPTH.with(|d| {
                let prev = d.get();
                d.set(prev + 1);
                prev
            })
        }

        fn exit_critical(saved: u32) {
            MASK_DEPTH.with(|d| d.set(saved));
        }

        fn trigger_reschedule() {
            RESCHEDULE_REQUESTED.store(true, Ordering::SeqCst);
        }

        fn stack_frame_init(
            _entry: fn(usize),
            stack_top: *mut u8,
            _stack_bytes: usize,
            _arg: usize,
        ) -> *mut u8 {
            stack_top
        }

        unsafe fn context_switch(_cur_sp_slot: &mut *mut u8, _next_sp: *mut u8) {}

        fn now_us() -> u64 {
            NOW_US.load(Ordering::SeqCst)
        }

        fn arm_next_interval(us: u32) {
            ARMED_US.store(
                if us == crate::cfg::FOREVER_US {
                    u64::MAX
                } else {
                    NOW_US.load(Ordering::SeqCst) + us as u64
                },
                Ordering::SeqCst,
            );
        }

        fn in_interrupt() -> bool {
            false
        }

        fn in_thread_mode() -> bool {
            true
        }

        fn in_privileged_mode() -> bool {
            true
        }

        fn privileged_trap(routine: PrivilegedRoutine, args: &ArgPack) -> StatusWord {
            let _guard = CriticalSection::<TestPort>::enter();
            routine(args)
        }
    }
}
