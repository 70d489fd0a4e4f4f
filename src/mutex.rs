//! Mutex with priority inheritance.
//!
//! Structurally this is the teacher crate's `mutex.rs` (a wait queue plus an
//! owner slot) generalized from its priority-*ceiling* protocol to priority
//! *inheritance*: on a contended lock, the owner's effective priority is
//! raised to the maximum of its own base priority and every blocked
//! waiter's, and restored to its base priority on unlock. Raising/lowering a
//! thread's effective priority is delegated to
//! [`task::set_effective_priority`], which re-homes it on the ready list if
//! it's currently queued.

use core::cell::Cell;
use core::ptr::NonNull;

use crate::cfg::MAX_MUTEXES;
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

struct MutexCb {
    owner: Cell<Option<usize>>,
    waiters: List,
    live: Cell<bool>,
}

impl MutexCb {
    const fn new() -> Self {
        MutexCb {
            owner: Cell::new(None),
            waiters: List::new(),
            live: Cell::new(false),
        }
    }
}

unsafe impl Sync for MutexCb {}

static MUTEXES: [MutexCb; MAX_MUTEXES] = {
    const INIT: MutexCb = MutexCb::new();
    [INIT; MAX_MUTEXES]
};

fn mutex_cb(index: usize) -> &'static MutexCb {
    &MUTEXES[index]
}

fn resolve(id: Id) -> Option<usize> {
    let idx = id.checked_index(Kind::Mutex)?;
    if idx >= MAX_MUTEXES {
        return None;
    }
    Some(idx)
}

/// Orders blocked waiters by effective priority (highest first), FIFO among
/// equal priorities — the head of `waiters` is always the next owner and
/// the one [`recompute_owner_priority`] weighs most.
fn priority_order(cur: NonNull<Node>, new: NonNull<Node>) -> bool {
    let cur = unsafe { &*(cur.as_ptr() as *const Waiter) };
    let new = unsafe { &*(new.as_ptr() as *const Waiter) };
    task::effective_priority_of(cur.task_index.get()) <= task::effective_priority_of(new.task_index.get())
}

pub fn create() -> Result<Id, StatusWord> {
    let idx = MUTEXES
        .iter()
        .position(|m| !m.live.get())
        .ok_or(StatusWord::err(Component::Mutex, Reason::Full))?;
    mutex_cb(idx).live.set(true);
    Ok(Id::new(Kind::Mutex, idx))
}

/// Recomputes and applies the owner's effective priority as the max of its
/// own base priority and every blocked waiter's effective priority.
fn recompute_owner_priority(cb: &MutexCb) {
    let Some(owner) = cb.owner.get() else { return };
    let mut highest = task::resolve_priority_floor(owner);
    for p in cb.waiters.iter() {
        let waiter = unsafe { &*(p.as_ptr() as *const Waiter) };
        let wp = task::effective_priority_of(waiter.task_index.get());
        if wp < highest {
            highest = wp;
        }
    }
    task::set_effective_priority(owner, highest);
}

pub fn lock<P: Port>(id: Id, timeout_us: u32) -> StatusWord {
    let Some(idx) = resolve(id) else {
        return StatusWord::err(Component::Mutex, Reason::BadId);
    };
    let _cs = CriticalSection::<P>::enter();
    let cb = mutex_cb(idx);
    if !cb.live.get() {
        return StatusWord::err(Component::Mutex, Reason::Uninit);
    }
    let Some(cur) = task::current() else {
        return StatusWord::err(Component::Mutex, Reason::WouldBlock);
    };
    if cb.owner.get() == Some(cur) {
        return StatusWord::err(Component::Mutex, Reason::Recursive);
    }
    if cb.owner.get().is_none() {
        cb.owner.set(Some(cur));
        return StatusWord::ok();
    }
    if timeout_us == 0 {
        return StatusWord::err(Component::Mutex, Reason::WouldBlock);
    }
    let waiter = Waiter::new(cur);
    cb.waiters.insert_sorted(&waiter.node, priority_order);
    recompute_owner_priority(cb);
    task::block::<P>(cur, timeout_us);
    drop(_cs);

    match task::take_wake_reason(cur) {
        WakeReason::Satisfied => {
            let _cs = CriticalSection::<P>::enter();
            cb.owner.set(Some(cur));
            StatusWord::ok()
        }
        WakeReason::TimedOut => {
            let _cs = CriticalSection::<P>::enter();
            cb.waiters.remove(&waiter.node);
            recompute_owner_priority(cb);
            StatusWord::timeout(Component::Mutex)
        }
        WakeReason::Interrupted => {
            let _cs = CriticalSection::<P>::enter();
            cb.waiters.remove(&waiter.node);
            recompute_owner_priority(cb);
            StatusWord::interrupted(Component::Mutex)
        }
    }
}

/// Releases the mutex. Only the owner may call this. Hands ownership
/// directly to the longest-waiting blocked thread (if any), restoring the
/// previous owner's base priority before doing so.
pub fn unlock<P: Port>(id: Id) -> StatusWord {
    let Some(idx) = resolve(id) else {
        return StatusWord::err(Component::Mutex, Reason::BadId);
    };
    let _cs = CriticalSection::<P>::enter();
    let cb = mutex_cb(idx);
    if !cb.live.get() {
        return StatusWord::err(Component::Mutex, Reason::Uninit);
    }
    let Some(cur) = task::current() else {
        return StatusWord::err(Component::Mutex, Reason::WouldBlock);
    };
    if cb.owner.get() != Some(cur) {
        return StatusWord::err(Component::Mutex, Reason::NotOwner);
    }
    task::set_effective_priority(cur, task::resolve_priority_floor(cur));

    if let Some(node) = cb.waiters.pop_front() {
        let waiter = unsafe { &*(node.as_ptr() as *const Waiter) };
        let next_owner = waiter.task_index.get();
        cb.owner.set(Some(next_owner));
        recompute_owner_priority(cb);
        task::wake::<P>(next_owner, WakeReason::Satisfied);
    } else {
        cb.owner.set(None);
    }
    StatusWord::ok()
}

pub fn owner(id: Id) -> Option<usize> {
    resolve(id).and_then(|idx| mutex_cb(idx).owner.get())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hw::test_port::TestPort;

    #[test]
    fn lock_unowned_succeeds_immediately() {
        let id = create().unwrap();
        assert!(owner(id).is_none());
    }

    #[test]
    fn unlock_by_non_owner_is_rejected() {
        let id = create().unwrap();
        assert_eq!(unlock::<TestPort>(id).reason(), Reason::WouldBlock);
    }

    #[test]
    fn waiters_queue_in_priority_order_not_arrival_order() {
        let id = create().unwrap();
        let cb = mutex_cb(resolve(id).unwrap());

        task::set_effective_priority(22, 5);
        task::set_effective_priority(23, 1);
        let low_prio_first = Waiter::new(22);
        let high_prio_second = Waiter::new(23);

        cb.waiters.insert_sorted(&low_prio_first.node, priority_order);
        cb.waiters.insert_sorted(&high_prio_second.node, priority_order);

        let front = unsafe { &*(cb.waiters.front().unwrap().as_ptr() as *const Waiter) };
        assert_eq!(front.task_index.get(), 23);
    }
}
