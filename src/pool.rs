//! Fixed-size memory pool: alloc/free over a static array of block slots.

use core::cell::Cell;
use core::ptr::NonNull;

use crate::cfg::{MAX_POOL_BLOCKS, MAX_POOLS, POOL_BLOCK_BYTES};
use crate::error::{Component, Reason, StatusWord};
use crate::hw::{CriticalSection, Port};
use crate::list::{List, Node};
use crate::registry::{Id, Kind};
use crate::task::{self, WakeReason};

struct Waiter {
    node: Node,
    task_index: Cell<usize>,
    granted: Cell<Option<usize>>,
}

struct PoolCb {
    blocks: [Cell<[u8; POOL_BLOCK_BYTES]>; MAX_POOL_BLOCKS],
    free: Cell<u32>,
    block_count: Cell<usize>,
    waiters: List,
    live: Cell<bool>,
}

impl PoolCb {
    const fn new() -> Self {
        const EMPTY_BLOCK: Cell<[u8; POOL_BLOCK_BYTES]> = Cell::new([0u8; POOL_BLOCK_BYTES]);
        PoolCb {
            blocks: [EMPTY_BLOCK; MAX_POOL_BLOCKS],
            free: Cell::new(0),
            block_count: Cell::new(0),
            waiters: List::new(),
            live: Cell::new(false),
        }
    }
}

unsafe impl Sync for PoolCb {}

static POOLS: [PoolCb; MAX_POOLS] = {
    const INIT: PoolCb = PoolCb::new();
    [INIT; MAX_POOLS]
};

fn pool_cb(index: usize) -> &'static PoolCb {
    &POOLS[index]
}

fn resolve(id: Id) -> Option<usize> {
    let idx = id.checked_index(Kind::Pool)?;
    if idx >= MAX_POOLS {
        return None;
    }
    Some(idx)
}

pub fn create(block_count: usize) -> Result<Id, StatusWord> {
    if block_count == 0 || block_count > MAX_POOL_BLOCKS {
        return Err(StatusWord::err(Component::Pool, Reason::BadParam));
    }
    let idx = POOLS
        .iter()
        .position(|p| !p.live.get())
        .ok_or(StatusWord::err(Component::Pool, Reason::Full))?;
    let cb = pool_cb(idx);
    cb.block_count.set(block_count);
    cb.free.set((1u32.checked_shl(block_count as u32).unwrap_or(0)).wrapping_sub(1));
    cb.live.set(true);
    Ok(Id::new(Kind::Pool, idx))
}

/// Orders blocked allocators by effective priority (highest first), FIFO
/// among equal priorities — the head of `waiters` is the one [`free`]
/// grants a freed block to.
fn priority_order(cur: NonNull<Node>, new: NonNull<Node>) -> bool {
    let cur = unsafe { &*(cur.as_ptr() as *const Waiter) };
    let new = unsafe { &*(new.as_ptr() as *const Waiter) };
    task::effective_priority_of(cur.task_index.get()) <= task::effective_priority_of(new.task_index.get())
}

fn take_free_block(cb: &PoolCb) -> Option<usize> {
    let mask = cb.free.get();
    if mask == 0 {
        return None;
    }
    let idx = mask.trailing_zeros() as usize;
    cb.free.set(mask & !(1 << idx));
    Some(idx)
}

/// Blocks (up to `timeout_us`) until a block is free, then returns its
/// index. The caller addresses the block's storage via
/// [`block_bytes_mut`]/[`block_bytes`].
pub fn alloc<P: Port>(id: Id, timeout_us: u32) -> Result<usize, StatusWord> {
    let Some(idx) = resolve(id) else {
        return Err(StatusWord::err(Component::Pool, Reason::BadId));
    };
    let _cs = CriticalSection::<P>::enter();
    let cb = pool_cb(idx);
    if !cb.live.get() {
        return Err(StatusWord::err(Component::Pool, Reason::Uninit));
    }
    if let Some(block) = take_free_block(cb) {
        return Ok(block);
    }
    if timeout_us == 0 {
        return Err(StatusWord::err(Component::Pool, Reason::Empty));
    }
    let Some(cur) = task::current() else {
        return Err(StatusWord::err(Component::Pool, Reason::Empty));
    };
    let waiter = Waiter {
        node: Node::new(),
        task_index: Cell::new(cur),
        granted: Cell::new(None),
    };
    cb.waiters.insert_sorted(&waiter.node, priority_order);
    task::block::<P>(cur, timeout_us);
    drop(_cs);

    let reason = task::take_wake_reason(cur);
    let _cs = CriticalSection::<P>::enter();
    cb.waiters.remove(&waiter.node);
    match reason {
        WakeReason::Satisfied => Ok(waiter.granted.get().expect("satisfied wake always grants a block")),
        WakeReason::TimedOut => Err(StatusWord::timeout(Component::Pool)),
        WakeReason::Interrupted => Err(StatusWord::interrupted(Component::Pool)),
    }
}

/// Returns `block` to the pool, directly granting it to the
/// longest-waiting blocked allocator if any, rather than just marking it
/// free and letting that waiter re-scan on wake.
pub fn free<P: Port>(id: Id, block: usize) -> StatusWord {
    let Some(idx) = resolve(id) else {
        return StatusWord::err(Component::Pool, Reason::BadId);
    };
    let _cs = CriticalSection::<P>::enter();
    let cb = pool_cb(idx);
    if !cb.live.get() || block >= cb.block_count.get() {
        return StatusWord::err(Component::Pool, Reason::BadParam);
    }
    if let Some(p) = cb.waiters.pop_front() {
        let waiter = unsafe { &*(p.as_ptr() as *const Waiter) };
        waiter.granted.set(Some(block));
        task::wake::<P>(waiter.task_index.get(), WakeReason::Satisfied);
    } else {
        cb.free.set(cb.free.get() | (1 << block));
    }
    StatusWord::ok()
}

pub fn block_bytes(id: Id, block: usize) -> Option<[u8; POOL_BLOCK_BYTES]> {
    let idx = resolve(id)?;
    Some(pool_cb(idx).blocks[block].get())
}

pub fn write_block(id: Id, block: usize, data: &[u8]) {
    if let Some(idx) = resolve(id) {
        let cb = pool_cb(idx);
        let mut buf = cb.blocks[block].get();
        let n = data.len().min(POOL_BLOCK_BYTES);
        buf[..n].copy_from_slice(&data[..n]);
        cb.blocks[block].set(buf);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hw::test_port::TestPort;

    #[test]
    fn alloc_and_free_round_trip() {
        let id = create(4).unwrap();
        let a = alloc::<TestPort>(id, 0).unwrap();
        let b = alloc::<TestPort>(id, 0).unwrap();
        assert_ne!(a, b);
        assert!(free::<TestPort>(id, a).is_ok());
        let c = alloc::<TestPort>(id, 0).unwrap();
        assert_eq!(c, a);
    }

    #[test]
    fn alloc_fails_fast_when_exhausted() {
        let id = create(1).unwrap();
        alloc::<TestPort>(id, 0).unwrap();
        assert_eq!(alloc::<TestPort>(id, 0).unwrap_err().reason(), Reason::Empty);
    }

    #[test]
    fn waiters_queue_in_priority_order_not_arrival_order() {
        let id = create(1).unwrap();
        let cb = pool_cb(resolve(id).unwrap());

        task::set_effective_priority(26, 5);
        task::set_effective_priority(27, 1);
        let low_prio_first = Waiter {
            node: Node::new(),
            task_index: Cell::new(26),
            granted: Cell::new(None),
        };
        let high_prio_second = Waiter {
            node: Node::new(),
            task_index: Cell::new(27),
            granted: Cell::new(None),
        };

        cb.waiters.insert_sorted(&low_prio_first.node, priority_order);
        cb.waiters.insert_sorted(&high_prio_second.node, priority_order);

        let front = unsafe { &*(cb.waiters.front().unwrap().as_ptr() as *const Waiter) };
        assert_eq!(front.task_index.get(), 27);
    }
}
