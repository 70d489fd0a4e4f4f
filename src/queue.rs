//! Bounded FIFO/LIFO queue with direct sender/receiver handoff.
//!
//! The internal buffer is the source of truth: a blocked sender or receiver
//! never wakes up and re-runs its own `send`/`receive` body from scratch
//! (which would race against whatever else runs between the wake and the
//! resumption) — instead, whichever side is already holding the critical
//! section performs the other side's half of the copy itself before waking
//! it, the same "wake with the work already done" shape
//! [`crate::semaphore`] and [`crate::mutex`] use for their own handoffs.

use core::cell::{Cell, RefCell};
use core::ptr::NonNull;

use arrayvec::ArrayVec;

use crate::cfg::{MAX_QUEUES, MAX_QUEUE_CAPACITY, QUEUE_SLOT_BYTES};
use crate::error::{Component, Reason, StatusWord};
use crate::hw::{CriticalSection, Port};
use crate::list::{List, Node};
use crate::registry::{Id, Kind};
use crate::task::{self, WakeReason};

type Slot = ([u8; QUEUE_SLOT_BYTES], usize);

struct SendWaiter {
    node: Node,
    task_index: Cell<usize>,
    data: Cell<Slot>,
    to_front: Cell<bool>,
}

struct RecvWaiter {
    node: Node,
    task_index: Cell<usize>,
    out: RefCell<[u8; QUEUE_SLOT_BYTES]>,
    out_len: Cell<usize>,
}

struct QueueCb {
    buf: RefCell<ArrayVec<Slot, MAX_QUEUE_CAPACITY>>,
    capacity: Cell<usize>,
    send_waiters: List,
    recv_waiters: List,
    live: Cell<bool>,
}

impl QueueCb {
    const fn new() -> Self {
        QueueCb {
            buf: RefCell::new(ArrayVec::new_const()),
            capacity: Cell::new(0),
            send_waiters: List::new(),
            recv_waiters: List::new(),
            live: Cell::new(false),
        }
    }
}

unsafe impl Sync for QueueCb {}

static QUEUES: [QueueCb; MAX_QUEUES] = {
    const INIT: QueueCb = QueueCb::new();
    [INIT; MAX_QUEUES]
};

fn queue_cb(index: usize) -> &'static QueueCb {
    &QUEUES[index]
}

fn resolve(id: Id) -> Option<usize> {
    let idx = id.checked_index(Kind::Queue)?;
    if idx >= MAX_QUEUES {
        return None;
    }
    Some(idx)
}

pub fn create(capacity: usize) -> Result<Id, StatusWord> {
    if capacity == 0 || capacity > MAX_QUEUE_CAPACITY {
        return Err(StatusWord::err(Component::Queue, Reason::BadParam));
    }
    let idx = QUEUES
        .iter()
        .position(|q| !q.live.get())
        .ok_or(StatusWord::err(Component::Queue, Reason::Full))?;
    let cb = queue_cb(idx);
    cb.capacity.set(capacity);
    cb.buf.borrow_mut().clear();
    cb.live.set(true);
    Ok(Id::new(Kind::Queue, idx))
}

fn to_slot(data: &[u8]) -> Slot {
    let mut buf = [0u8; QUEUE_SLOT_BYTES];
    let n = data.len().min(QUEUE_SLOT_BYTES);
    buf[..n].copy_from_slice(&data[..n]);
    (buf, n)
}

fn push_slot(buf: &mut ArrayVec<Slot, MAX_QUEUE_CAPACITY>, slot: Slot, to_front: bool) {
    if to_front {
        buf.insert(0, slot);
    } else {
        buf.push(slot);
    }
}

/// Orders blocked senders by effective priority (highest first), FIFO among
/// equal priorities.
fn send_priority_order(cur: NonNull<Node>, new: NonNull<Node>) -> bool {
    let cur = unsafe { &*(cur.as_ptr() as *const SendWaiter) };
    let new = unsafe { &*(new.as_ptr() as *const SendWaiter) };
    task::effective_priority_of(cur.task_index.get()) <= task::effective_priority_of(new.task_index.get())
}

/// Orders blocked receivers the same way as [`send_priority_order`].
fn recv_priority_order(cur: NonNull<Node>, new: NonNull<Node>) -> bool {
    let cur = unsafe { &*(cur.as_ptr() as *const RecvWaiter) };
    let new = unsafe { &*(new.as_ptr() as *const RecvWaiter) };
    task::effective_priority_of(cur.task_index.get()) <= task::effective_priority_of(new.task_index.get())
}

pub fn send<P: Port>(id: Id, data: &[u8], timeout_us: u32, to_front: bool) -> StatusWord {
    let Some(idx) = resolve(id) else {
        return StatusWord::err(Component::Queue, Reason::BadId);
    };
    let _cs = CriticalSection::<P>::enter();
    let cb = queue_cb(idx);
    if !cb.live.get() {
        return StatusWord::err(Component::Queue, Reason::Uninit);
    }

    if cb.buf.borrow().len() < cb.capacity.get() {
        push_slot(&mut cb.buf.borrow_mut(), to_slot(data), to_front);
        if let Some(p) = cb.recv_waiters.pop_front() {
            let waiter = unsafe { &*(p.as_ptr() as *const RecvWaiter) };
            let (slot, len) = cb.buf.borrow_mut().remove(0);
            waiter.out.borrow_mut()[..len].copy_from_slice(&slot[..len]);
            waiter.out_len.set(len);
            task::wake::<P>(waiter.task_index.get(), WakeReason::Satisfied);
        }
        return StatusWord::ok();
    }

    if timeout_us == 0 {
        return StatusWord::err(Component::Queue, Reason::Full);
    }
    let Some(cur) = task::current() else {
        return StatusWord::err(Component::Queue, Reason::Full);
    };
    let waiter = SendWaiter {
        node: Node::new(),
        task_index: Cell::new(cur),
        data: Cell::new(to_slot(data)),
        to_front: Cell::new(to_front),
    };
    cb.send_waiters.insert_sorted(&waiter.node, send_priority_order);
    task::block::<P>(cur, timeout_us);
    drop(_cs);

    let reason = task::take_wake_reason(cur);
    let _cs = CriticalSection::<P>::enter();
    cb.send_waiters.remove(&waiter.node);
    match reason {
        WakeReason::Satisfied => StatusWord::ok(),
        WakeReason::TimedOut => StatusWord::timeout(Component::Queue),
        WakeReason::Interrupted => StatusWord::interrupted(Component::Queue),
    }
}

pub fn receive<P: Port>(id: Id, out: &mut [u8], timeout_us: u32) -> Result<usize, StatusWord> {
    let Some(idx) = resolve(id) else {
        return Err(StatusWord::err(Component::Queue, Reason::BadId));
    };
    let _cs = CriticalSection::<P>::enter();
    let cb = queue_cb(idx);
    if !cb.live.get() {
        return Err(StatusWord::err(Component::Queue, Reason::Uninit));
    }

    if !cb.buf.borrow().is_empty() {
        let (slot, len) = cb.buf.borrow_mut().remove(0);
        let n = len.min(out.len());
        out[..n].copy_from_slice(&slot[..n]);
        if let Some(p) = cb.send_waiters.pop_front() {
            let waiter = unsafe { &*(p.as_ptr() as *const SendWaiter) };
            push_slot(&mut cb.buf.borrow_mut(), waiter.data.get(), waiter.to_front.get());
            task::wake::<P>(waiter.task_index.get(), WakeReason::Satisfied);
        }
        return Ok(n);
    }

    if timeout_us == 0 {
        return Err(StatusWord::err(Component::Queue, Reason::Empty));
    }
    let Some(cur) = task::current() else {
        return Err(StatusWord::err(Component::Queue, Reason::Empty));
    };
    let waiter = RecvWaiter {
        node: Node::new(),
        task_index: Cell::new(cur),
        out: RefCell::new([0u8; QUEUE_SLOT_BYTES]),
        out_len: Cell::new(0),
    };
    cb.recv_waiters.insert_sorted(&waiter.node, recv_priority_order);
    task::block::<P>(cur, timeout_us);
    drop(_cs);

    let reason = task::take_wake_reason(cur);
    let _cs = CriticalSection::<P>::enter();
    cb.recv_waiters.remove(&waiter.node);
    match reason {
        WakeReason::Satisfied => {
            let len = waiter.out_len.get();
            let n = len.min(out.len());
            out[..n].copy_from_slice(&waiter.out.borrow()[..n]);
            Ok(n)
        }
        WakeReason::TimedOut => Err(StatusWord::timeout(Component::Queue)),
        WakeReason::Interrupted => Err(StatusWord::interrupted(Component::Queue)),
    }
}

pub fn len(id: Id) -> Option<usize> {
    resolve(id).map(|idx| queue_cb(idx).buf.borrow().len())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hw::test_port::TestPort;

    #[test]
    fn send_then_receive_round_trips() {
        let id = create(4).unwrap();
        assert!(send::<TestPort>(id, &[1, 2, 3], 0, false).is_ok());
        let mut out = [0u8; QUEUE_SLOT_BYTES];
        let n = receive::<TestPort>(id, &mut out, 0).unwrap();
        assert_eq!(&out[..n], &[1, 2, 3]);
    }

    #[test]
    fn to_front_overtakes_fifo_order() {
        let id = create(4).unwrap();
        send::<TestPort>(id, &[1], 0, false);
        send::<TestPort>(id, &[2], 0, true);
        let mut out = [0u8; QUEUE_SLOT_BYTES];
        let n = receive::<TestPort>(id, &mut out, 0).unwrap();
        assert_eq!(&out[..n], &[2]);
    }

    #[test]
    fn send_to_full_queue_without_blocking_fails_fast() {
        let id = create(1).unwrap();
        send::<TestPort>(id, &[1], 0, false);
        assert_eq!(send::<TestPort>(id, &[2], 0, false).reason(), Reason::Full);
    }

    #[test]
    fn blocked_receivers_queue_in_priority_order_not_arrival_order() {
        let id = create(1).unwrap();
        let cb = queue_cb(resolve(id).unwrap());

        task::set_effective_priority(24, 5);
        task::set_effective_priority(25, 1);
        let low_prio_first = RecvWaiter {
            node: Node::new(),
            task_index: Cell::new(24),
            out: RefCell::new([0u8; QUEUE_SLOT_BYTES]),
            out_len: Cell::new(0),
        };
        let high_prio_second = RecvWaiter {
            node: Node::new(),
            task_index: Cell::new(25),
            out: RefCell::new([0u8; QUEUE_SLOT_BYTES]),
            out_len: Cell::new(0),
        };

        cb.recv_waiters.insert_sorted(&low_prio_first.node, recv_priority_order);
        cb.recv_waiters.insert_sorted(&high_prio_second.node, recv_priority_order);

        let front = unsafe { &*(cb.recv_waiters.front().unwrap().as_ptr() as *const RecvWaiter) };
        assert_eq!(front.task_index.get(), 25);
    }
}
