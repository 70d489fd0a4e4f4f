//! Pub/sub topic: `publish` stores the latest value and fans it out to
//! subscribers, each either edge- (semaphore signal) or level- (buffer copy)
//! notified.
//!
//! Deliberately has no back-pressure: `publish` never blocks and never
//! fails because a subscriber hasn't caught up (see DESIGN.md — an
//! intentionally preserved open question, not an oversight). A slow
//! level-mode subscriber simply observes the most recent value whenever it
//! next reads it; a slow edge-mode subscriber's semaphore just saturates at
//! its configured maximum, collapsing multiple publishes into one wakeup.

use core::cell::Cell;

use arrayvec::ArrayVec;

use crate::cfg::{MAX_SUBSCRIBERS_PER_TOPIC, MAX_TOPICS, QUEUE_SLOT_BYTES};
use crate::error::{Component, Reason, StatusWord};
use crate::hw::{CriticalSection, Port};
use crate::registry::{Id, Kind};

#[derive(Clone, Copy)]
pub enum Sink {
    /// Edge notification: publishing signals this semaphore.
    Edge(Id),
    /// Level notification: publishing copies the value into this slot,
    /// read back later with [`read_level`].
    Level(usize),
}

struct LevelSlot {
    data: Cell<[u8; QUEUE_SLOT_BYTES]>,
    len: Cell<usize>,
}

impl LevelSlot {
    const fn new() -> Self {
        LevelSlot {
            data: Cell::new([0u8; QUEUE_SLOT_BYTES]),
            len: Cell::new(0),
        }
    }
}

struct TopicCb {
    subscribers: core::cell::RefCell<ArrayVec<Sink, MAX_SUBSCRIBERS_PER_TOPIC>>,
    levels: [LevelSlot; MAX_SUBSCRIBERS_PER_TOPIC],
    next_level_slot: Cell<usize>,
    live: Cell<bool>,
}

impl TopicCb {
    const fn new() -> Self {
        const EMPTY: LevelSlot = LevelSlot::new();
        TopicCb {
            subscribers: core::cell::RefCell::new(ArrayVec::new_const()),
            levels: [EMPTY; MAX_SUBSCRIBERS_PER_TOPIC],
            next_level_slot: Cell::new(0),
            live: Cell::new(false),
        }
    }
}

unsafe impl Sync for TopicCb {}

static TOPICS: [TopicCb; MAX_TOPICS] = {
    const INIT: TopicCb = TopicCb::new();
    [INIT; MAX_TOPICS]
};

fn topic_cb(index: usize) -> &'static TopicCb {
    &TOPICS[index]
}

fn resolve(id: Id) -> Option<usize> {
    let idx = id.checked_index(Kind::Topic)?;
    if idx >= MAX_TOPICS {
        return None;
    }
    Some(idx)
}

pub fn create() -> Result<Id, StatusWord> {
    let idx = TOPICS
        .iter()
        .position(|t| !t.live.get())
        .ok_or(StatusWord::err(Component::Topic, Reason::Full))?;
    let cb = topic_cb(idx);
    cb.subscribers.borrow_mut().clear();
    cb.next_level_slot.set(0);
    cb.live.set(true);
    Ok(Id::new(Kind::Topic, idx))
}

/// Appends a subscriber. For [`Sink::Level`] the caller passes a slot index
/// obtained from [`reserve_level_slot`]; for [`Sink::Edge`] the caller
/// passes a semaphore it already created and owns.
pub fn subscribe(id: Id, sink: Sink) -> StatusWord {
    let Some(idx) = resolve(id) else {
        return StatusWord::err(Component::Topic, Reason::BadId);
    };
    let cb = topic_cb(idx);
    if !cb.live.get() {
        return StatusWord::err(Component::Topic, Reason::Uninit);
    }
    let mut subs = cb.subscribers.borrow_mut();
    if subs.try_push(sink).is_err() {
        return StatusWord::err(Component::Topic, Reason::Full);
    }
    StatusWord::ok()
}

pub fn reserve_level_slot(id: Id) -> Option<usize> {
    let idx = resolve(id)?;
    let cb = topic_cb(idx);
    let slot = cb.next_level_slot.get();
    if slot >= MAX_SUBSCRIBERS_PER_TOPIC {
        return None;
    }
    cb.next_level_slot.set(slot + 1);
    Some(slot)
}

/// Fans `value` out to every subscriber: signals each edge-mode semaphore,
/// copies into each level-mode slot. Never blocks, never fails on a slow
/// subscriber.
pub fn publish<P: Port>(id: Id, value: &[u8]) -> StatusWord {
    let Some(idx) = resolve(id) else {
        return StatusWord::err(Component::Topic, Reason::BadId);
    };
    let _cs = CriticalSection::<P>::enter();
    let cb = topic_cb(idx);
    if !cb.live.get() {
        return StatusWord::err(Component::Topic, Reason::Uninit);
    }
    for sink in cb.subscribers.borrow().iter() {
        match *sink {
            Sink::Edge(sem_id) => {
                let _ = crate::semaphore::give::<P>(sem_id);
            }
            Sink::Level(slot) => {
                let n = value.len().min(QUEUE_SLOT_BYTES);
                let mut buf = cb.levels[slot].data.get();
                buf[..n].copy_from_slice(&value[..n]);
                cb.levels[slot].data.set(buf);
                cb.levels[slot].len.set(n);
            }
        }
    }
    StatusWord::ok()
}

pub fn read_level(id: Id, slot: usize, out: &mut [u8]) -> Option<usize> {
    let idx = resolve(id)?;
    let cb = topic_cb(idx);
    let n = cb.levels[slot].len.get().min(out.len());
    let data = cb.levels[slot].data.get();
    out[..n].copy_from_slice(&data[..n]);
    Some(n)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hw::test_port::TestPort;

    #[test]
    fn level_subscriber_sees_latest_published_value() {
        let topic = create().unwrap();
        let slot = reserve_level_slot(topic).unwrap();
        subscribe(topic, Sink::Level(slot));
        publish::<TestPort>(topic, &[9, 8, 7]);
        let mut out = [0u8; QUEUE_SLOT_BYTES];
        let n = read_level(topic, slot, &mut out).unwrap();
        assert_eq!(&out[..n], &[9, 8, 7]);
    }

    #[test]
    fn edge_subscriber_receives_a_semaphore_signal() {
        let topic = create().unwrap();
        let sem = crate::semaphore::create(0, 1).unwrap();
        subscribe(topic, Sink::Edge(sem));
        publish::<TestPort>(topic, &[1]);
        assert_eq!(crate::semaphore::count(sem), Some(1));
    }
}
