//! Compile-time capacity configuration.
//!
//! A build targets one board/application, so every capacity below is a plain
//! `const` rather than a trait parameter threaded through the rest of the
//! crate. An integrator wanting different limits forks this file.

/// Priorities are small integers, 0 = highest. The ready list and the
/// priority bitmap are both sized off this constant.
pub const MAX_PRIORITY: usize = 32;

/// Sentinel priority meaning "not currently queued on any ready list".
pub const PRIORITY_NONE: u8 = u8::MAX;

/// Maximum number of statically declared threads (see [`crate::boot`]).
pub const MAX_TASKS: usize = 32;

/// Maximum number of semaphore control blocks.
pub const MAX_SEMAPHORES: usize = 16;

/// Maximum number of mutex control blocks.
pub const MAX_MUTEXES: usize = 16;

/// Maximum number of event-flag control blocks.
pub const MAX_EVENTS: usize = 16;

/// Maximum number of queue control blocks.
pub const MAX_QUEUES: usize = 8;

/// Maximum number of memory pool control blocks.
pub const MAX_POOLS: usize = 8;

/// Maximum number of pub/sub topic control blocks.
pub const MAX_TOPICS: usize = 8;

/// Maximum number of subscribers a single topic may hold.
pub const MAX_SUBSCRIBERS_PER_TOPIC: usize = 8;

/// Maximum number of timer control blocks, static and temporary combined.
pub const MAX_TIMERS: usize = 16;

/// Maximum in-flight slots held by a single bounded queue.
pub const MAX_QUEUE_CAPACITY: usize = 16;

/// Byte size of one queue slot payload.
pub const QUEUE_SLOT_BYTES: usize = 16;

/// Maximum blocks a single memory pool may hand out.
pub const MAX_POOL_BLOCKS: usize = 16;

/// Byte size of one pool block payload.
pub const POOL_BLOCK_BYTES: usize = 32;

/// Maximum number of init-function table entries (see [`crate::boot`]).
pub const MAX_INIT_FUNCS: usize = 16;

/// Number of distinct init levels; levels run in order `0..MAX_INIT_LEVELS`.
pub const MAX_INIT_LEVELS: usize = 8;

/// Sentinel duration meaning "no timeout" / "never rearm".
pub const FOREVER_US: u32 = u32::MAX;

/// Byte pattern a thread's stack is painted with before first run, so
/// [`crate::trace`] can estimate how much of it has ever been touched.
pub const STACK_PAINT_BYTE: u8 = 0xA5;

const _: () = assert!(MAX_PRIORITY <= 32, "the ready-queue bitmap is a u32");
