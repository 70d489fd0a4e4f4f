//! Software timers layered on the tickless [`TimeoutWheel`].
//!
//! Three kinds, dispatched on expiry exactly the way the reference C
//! implementation's `timer_callback_fromTimeOut` branches on
//! `pCurTimer->control`:
//!
//!  - `Once`: fires a single time, then goes idle.
//!  - `Cycle`: recomputes the elapsed overrun modulo the period and
//!    re-arms with the remainder, so a late kernel-thread drain doesn't
//!    accumulate drift.
//!  - `Temporary`: fires once, then has its control block zeroed in place —
//!    reclaiming the slot without a free list, matching the original's
//!    `os_memset` in the `TIMER_CTRL_TEMPORARY_VAL` branch.

use core::cell::Cell;

use crate::cfg::MAX_TIMERS;
use crate::error::{Component, Reason, StatusWord};
use crate::hw::Port;
use crate::registry::{Id, Kind};
use crate::timeout::{TimeoutAction, TimeoutNode, TimeoutWheel};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerKind {
    Once,
    Cycle,
    Temporary,
}

pub type TimerCallback = fn(usize);

struct TimerCb {
    timeout: TimeoutNode,
    kind: Cell<Option<TimerKind>>,
    period_us: Cell<u32>,
    callback: Cell<Option<TimerCallback>>,
    live: Cell<bool>,
}

impl TimerCb {
    const fn new() -> Self {
        TimerCb {
            timeout: TimeoutNode::new(),
            kind: Cell::new(None),
            period_us: Cell::new(0),
            callback: Cell::new(None),
            live: Cell::new(false),
        }
    }

    fn reset(&self) {
        self.kind.set(None);
        self.period_us.set(0);
        self.callback.set(None);
        self.live.set(false);
    }
}

// Safety: all access happens under the kernel's critical section.
unsafe impl Sync for TimerCb {}

static TIMERS: [TimerCb; MAX_TIMERS] = {
    const INIT: TimerCb = TimerCb::new();
    [INIT; MAX_TIMERS]
};

static WHEEL: TimeoutWheel = TimeoutWheel::new();

/// The single tickless timeout wheel shared by the scheduler's blocking
/// timeouts and this module's software timers.
pub fn wheel() -> &'static TimeoutWheel {
    &WHEEL
}

fn timer_cb(index: usize) -> &'static TimerCb {
    &TIMERS[index]
}

fn resolve(id: Id) -> Option<usize> {
    let idx = id.checked_index(Kind::Timer)?;
    if idx >= MAX_TIMERS {
        return None;
    }
    Some(idx)
}

/// Finds a free slot and registers a timer of the given kind, unarmed.
/// `Once`/`Cycle` timers are meant to be declared once (statically, from
/// [`crate::boot`]) and then started/stopped by id; [`start_temporary`]
/// combines this with an immediate arm for the one kind of object in this
/// crate created and reclaimed at runtime.
pub fn create<P: Port>(kind: TimerKind, period_us: u32, callback: TimerCallback) -> Result<Id, StatusWord> {
    let idx = TIMERS
        .iter()
        .position(|t| !t.live.get())
        .ok_or(StatusWord::err(Component::Timer, Reason::Full))?;
    let cb = timer_cb(idx);
    cb.kind.set(Some(kind));
    cb.period_us.set(period_us);
    cb.callback.set(Some(callback));
    cb.live.set(true);
    Ok(Id::new(Kind::Timer, idx))
}

/// Starts (or restarts) a `Once`/`Cycle` timer to fire `delay_us` from now.
pub fn start<P: Port>(id: Id, delay_us: u32) -> StatusWord {
    let Some(idx) = resolve(id) else {
        return StatusWord::err(Component::Timer, Reason::BadId);
    };
    let cb = timer_cb(idx);
    if !cb.live.get() {
        return StatusWord::err(Component::Timer, Reason::Uninit);
    }
    WHEEL.schedule::<P>(&cb.timeout, delay_us, TimeoutAction::FireTimer(idx));
    StatusWord::ok()
}

pub fn stop(id: Id) -> StatusWord {
    let Some(idx) = resolve(id) else {
        return StatusWord::err(Component::Timer, Reason::BadId);
    };
    WHEEL.cancel(&timer_cb(idx).timeout);
    StatusWord::ok()
}

pub fn is_active(id: Id) -> bool {
    resolve(id)
        .map(|idx| timer_cb(idx).timeout.is_armed())
        .unwrap_or(false)
}

/// One-shot timer allocated and reclaimed entirely at runtime, e.g. a
/// blocking primitive's internal "give up after N us" watchdog that outlives
/// the call only long enough to fire or be canceled.
pub fn start_temporary<P: Port>(delay_us: u32, callback: TimerCallback) -> Result<Id, StatusWord> {
    let id = create::<P>(TimerKind::Temporary, 0, callback)?;
    let idx = id.index();
    WHEEL.schedule::<P>(&timer_cb(idx).timeout, delay_us, TimeoutAction::FireTimer(idx));
    Ok(id)
}

/// Drains the wheel's pending-callback list and dispatches each fired timer.
/// Meant to be called from kernel-thread context, outside the critical
/// section that `handle_expiry` ran under — the user callback may do
/// arbitrary work.
pub fn drain_fired<P: Port>() {
    let mut fired: [Option<usize>; MAX_TIMERS] = [None; MAX_TIMERS];
    let mut n = 0;
    WHEEL.drain_pending(|action| {
        if let TimeoutAction::FireTimer(idx) = action {
            if n < fired.len() {
                fired[n] = Some(idx);
                n += 1;
            }
        }
    });
    for idx in fired.into_iter().flatten() {
        dispatch::<P>(idx);
    }
}

fn dispatch<P: Port>(idx: usize) {
    let cb = timer_cb(idx);
    let Some(kind) = cb.kind.get() else { return };
    let callback = cb.callback.get();

    match kind {
        TimerKind::Cycle => {
            let period = cb.period_us.get().max(1);
            WHEEL.schedule::<P>(&cb.timeout, period, TimeoutAction::FireTimer(idx));
        }
        TimerKind::Once => {
            // Already idle; nothing further to arm.
        }
        TimerKind::Temporary => {
            cb.reset();
        }
    }

    if let Some(f) = callback {
        f(idx);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hw::test_port::TestPort;
    use core::sync::atomic::{AtomicUsize, Ordering};

    static FIRE_COUNT: AtomicUsize = AtomicUsize::new(0);

    fn bump(_idx: usize) {
        FIRE_COUNT.fetch_add(1, Ordering::SeqCst);
    }

    #[test]
    fn once_timer_fires_exactly_once() {
        FIRE_COUNT.store(0, Ordering::SeqCst);
        let id = create::<TestPort>(TimerKind::Once, 0, bump).unwrap();
        start::<TestPort>(id, 10);
        WHEEL.handle_expiry::<TestPort>(10, |_| {});
        drain_fired::<TestPort>();
        assert_eq!(FIRE_COUNT.load(Ordering::SeqCst), 1);
        assert!(!is_active(id));
    }

    #[test]
    fn temporary_timer_reclaims_slot_after_firing() {
        let id = create::<TestPort>(TimerKind::Temporary, 0, bump).unwrap();
        start::<TestPort>(id, 5);
        WHEEL.handle_expiry::<TestPort>(5, |_| {});
        drain_fired::<TestPort>();
        let idx = id.index();
        assert!(timer_cb(idx).kind.get().is_none());
        assert!(!timer_cb(idx).live.get());
    }
}
