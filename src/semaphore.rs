//! Counting semaphore: take/give with a saturating maximum count.

use core::cell::Cell;
use core::ptr::NonNull;

use crate::cfg::MAX_SEMAPHORES;
#[cfg(test)]
use crate::cfg::FOREVER_US;
use crate::error::{Component, Reason, StatusWord};
use crate::hw::{CriticalSection, Port};
use crate::list::{List, Node};
use crate::registry::{Id, Kind};
use crate::task::{self, WakeReason};

struct Waiter {
    node: Node,
    task_index: Cell<usize>,
}

impl Waiter {
    const fn new(task_index: usize) -> Self {
        Waiter {
            node: Node::new(),
            task_index: Cell::new(task_index),
        }
    }
}

struct SemCb {
    count: Cell<u32>,
    max_count: Cell<u32>,
    waiters: List,
    live: Cell<bool>,
}

impl SemCb {
    const fn new() -> Self {
        SemCb {
            count: Cell::new(0),
            max_count: Cell::new(u32::MAX),
            waiters: List::new(),
            live: Cell::new(false),
        }
    }
}

unsafe impl Sync for SemCb {}

static SEMAPHORES: [SemCb; MAX_SEMAPHORES] = {
    const INIT: SemCb = SemCb::new();
    [INIT; MAX_SEMAPHORES]
};

fn sem_cb(index: usize) -> &'static SemCb {
    &SEMAPHORES[index]
}

fn resolve(id: Id) -> Option<usize> {
    let idx = id.checked_index(Kind::Semaphore)?;
    if idx >= MAX_SEMAPHORES {
        return None;
    }
    Some(idx)
}

/// Orders blocked waiters by effective priority (highest first), FIFO among
/// equal priorities — the head of `waiters` is always the next thread to
/// take the semaphore.
fn priority_order(cur: NonNull<Node>, new: NonNull<Node>) -> bool {
    let cur = unsafe { &*(cur.as_ptr() as *const Waiter) };
    let new = unsafe { &*(new.as_ptr() as *const Waiter) };
    task::effective_priority_of(cur.task_index.get()) <= task::effective_priority_of(new.task_index.get())
}

pub fn create(initial_count: u32, max_count: u32) -> Result<Id, StatusWord> {
    let idx = SEMAPHORES
        .iter()
        .position(|s| !s.live.get())
        .ok_or(StatusWord::err(Component::Semaphore, Reason::Full))?;
    let cb = sem_cb(idx);
    cb.count.set(initial_count.min(max_count));
    cb.max_count.set(max_count);
    cb.live.set(true);
    Ok(Id::new(Kind::Semaphore, idx))
}

/// Increments the count by one, up to `max_count`, waking the highest-
/// priority blocked taker (FIFO among equal priorities) if the semaphore
/// was empty.
pub fn give<P: Port>(id: Id) -> StatusWord {
    let Some(idx) = resolve(id) else {
        return StatusWord::err(Component::Semaphore, Reason::BadId);
    };
    let _cs = CriticalSection::<P>::enter();
    let cb = sem_cb(idx);
    if !cb.live.get() {
        return StatusWord::err(Component::Semaphore, Reason::Uninit);
    }
    if let Some(node) = cb.waiters.pop_front() {
        let waiter = unsafe { &*(node.as_ptr() as *const Waiter) };
        task::wake::<P>(waiter.task_index.get(), WakeReason::Satisfied);
        return StatusWord::ok();
    }
    if cb.count.get() >= cb.max_count.get() {
        return StatusWord::err(Component::Semaphore, Reason::Full);
    }
    cb.count.set(cb.count.get() + 1);
    StatusWord::ok()
}

/// Decrements the count by one if non-zero; otherwise blocks the caller
/// (thread context only) up to `timeout_us`.
pub fn take<P: Port>(id: Id, timeout_us: u32) -> StatusWord {
    let Some(idx) = resolve(id) else {
        return StatusWord::err(Component::Semaphore, Reason::BadId);
    };
    let _cs = CriticalSection::<P>::enter();
    let cb = sem_cb(idx);
    if !cb.live.get() {
        return StatusWord::err(Component::Semaphore, Reason::Uninit);
    }
    if cb.count.get() > 0 {
        cb.count.set(cb.count.get() - 1);
        return StatusWord::ok();
    }
    if timeout_us == 0 {
        return StatusWord::err(Component::Semaphore, Reason::WouldBlock);
    }
    if !P::in_thread_mode() {
        return StatusWord::err(Component::Semaphore, Reason::WouldBlock);
    }
    let Some(cur) = task::current() else {
        return StatusWord::err(Component::Semaphore, Reason::WouldBlock);
    };
    let waiter = Waiter::new(cur);
    cb.waiters.insert_sorted(&waiter.node, priority_order);
    task::block::<P>(cur, timeout_us);
    drop(_cs);

    match task::take_wake_reason(cur) {
        WakeReason::Satisfied => StatusWord::ok(),
        WakeReason::TimedOut => {
            let _cs = CriticalSection::<P>::enter();
            cb.waiters.remove(&waiter.node);
            StatusWord::timeout(Component::Semaphore)
        }
        WakeReason::Interrupted => {
            let _cs = CriticalSection::<P>::enter();
            cb.waiters.remove(&waiter.node);
            StatusWord::interrupted(Component::Semaphore)
        }
    }
}

/// Non-blocking variant of [`take`]: never waits, only checks the count.
pub fn poll<P: Port>(id: Id) -> StatusWord {
    take::<P>(id, 0)
}

pub fn count(id: Id) -> Option<u32> {
    resolve(id).map(|idx| sem_cb(idx).count.get())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hw::test_port::TestPort;

    #[test]
    fn give_then_take_round_trips() {
        let id = create(0, 4).unwrap();
        assert!(give::<TestPort>(id).is_ok());
        assert_eq!(count(id), Some(1));
        assert!(take::<TestPort>(id, FOREVER_US).is_ok());
        assert_eq!(count(id), Some(0));
    }

    #[test]
    fn give_saturates_at_max_count() {
        let id = create(2, 2).unwrap();
        assert_eq!(give::<TestPort>(id).reason(), Reason::Full);
    }

    #[test]
    fn take_without_blocking_fails_fast_when_empty() {
        let id = create(0, 1).unwrap();
        assert_eq!(poll::<TestPort>(id).reason(), Reason::WouldBlock);
    }

    #[test]
    fn waiters_wake_in_priority_order_not_arrival_order() {
        let id = create(0, 1).unwrap();
        let cb = sem_cb(resolve(id).unwrap());

        task::set_effective_priority(20, 5);
        task::set_effective_priority(21, 1);
        let low_prio_first = Waiter::new(20);
        let high_prio_second = Waiter::new(21);

        cb.waiters.insert_sorted(&low_prio_first.node, priority_order);
        cb.waiters.insert_sorted(&high_prio_second.node, priority_order);

        let front = unsafe { &*(cb.waiters.front().unwrap().as_ptr() as *const Waiter) };
        assert_eq!(front.task_index.get(), 21);
    }
}
