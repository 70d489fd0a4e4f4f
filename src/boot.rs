//! Static init: the init-function table and the static-thread table that
//! drive startup.
//!
//! Both tables are ordinary `&'static` slices the integrator assembles at
//! build time and passes in — unlike the reference C implementation, which
//! discovers them by scanning linker-script sections
//! (`INIT_SECTION_FOREACH`). That's out of scope here (section 1): this
//! core has no say over the target's linker script, so it asks for an
//! explicit slice instead.

use crate::hw::Port;
use crate::task;

/// One entry in the init-function table: `func` runs once, in ascending
/// `level` order, before any thread is made ready.
#[derive(Clone, Copy)]
pub struct InitEntry {
    pub level: u8,
    pub func: fn(),
}

/// One statically declared thread.
pub struct ThreadEntry {
    pub index: usize,
    pub priority: u8,
    pub entry: fn(usize),
    pub arg: usize,
    pub stack: &'static mut [u8],
}

/// Runs every init function in ascending level order, then declares and
/// readies every thread in `threads`, then marks `idle_index` as the idle
/// thread. Does not itself perform the first context switch — the
/// integrator calls that via the port once this returns, typically by
/// invoking [`task::pick_next`] and the port's own startup trampoline.
pub fn run<P: Port>(init_table: &[InitEntry], threads: &mut [ThreadEntry], idle_index: usize) {
    let max_level = init_table.iter().map(|e| e.level).max().unwrap_or(0);
    for level in 0..=max_level {
        for entry in init_table.iter().filter(|e| e.level == level) {
            (entry.func)();
        }
    }

    for t in threads.iter_mut() {
        task::declare::<P>(t.index, t.priority, t.entry, t.arg, t.stack);
    }

    task::set_idle_task(idle_index);
}

#[cfg(test)]
mod tests {
    use super::*;
    use core::sync::atomic::{AtomicU32, Ordering};

    static ORDER: AtomicU32 = AtomicU32::new(0);

    #[test]
    fn init_levels_run_in_ascending_order() {
        ORDER.store(0, Ordering::SeqCst);
        fn level0() {
            ORDER.fetch_or(0b01, Ordering::SeqCst);
        }
        fn level1() {
            assert_eq!(ORDER.load(Ordering::SeqCst) & 0b01, 0b01);
            ORDER.fetch_or(0b10, Ordering::SeqCst);
        }
        let table = [
            InitEntry { level: 1, func: level1 },
            InitEntry { level: 0, func: level0 },
        ];
        let mut threads: [ThreadEntry; 0] = [];
        run::<crate::hw::test_port::TestPort>(&table, &mut threads, 0);
        assert_eq!(ORDER.load(Ordering::SeqCst), 0b11);
    }
}
