//! Status word layout and the kernel's error taxonomy.
//!
//! Every mutating API returns a [`StatusWord`]: bit 31 is the error flag,
//! bits 30..24 carry a [`Component`] tag, and bits 23..0 carry a [`Reason`].
//! `StatusWord::SUCCESS` is the all-zero word. A thin [`KernelError`] enum
//! sits on top so application code can compose with `Result` and `?`; the
//! packed word stays available beneath it for ports that need the wire
//! representation (e.g. surfacing a result across an FFI boundary).

use core::fmt;

const ERROR_BIT: u32 = 1 << 31;
const COMPONENT_SHIFT: u32 = 24;
const COMPONENT_MASK: u32 = 0x7F << COMPONENT_SHIFT;
const REASON_MASK: u32 = (1 << 24) - 1;

/// Which kernel subsystem a [`StatusWord`] originated from.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Component {
    List = 0,
    Registry = 1,
    Timeout = 2,
    Scheduler = 3,
    Semaphore = 4,
    Mutex = 5,
    Event = 6,
    Queue = 7,
    Pool = 8,
    Topic = 9,
    Timer = 10,
    Boot = 11,
}

/// Narrow failure reason, orthogonal to which component raised it.
///
/// This is intentionally one flat enum rather than one enum per call site:
/// every API here returns the same [`StatusWord`] shape, so there's nothing
/// for a per-call subset to buy beyond documentation, and a flat enum is
/// exhaustively matchable in one place.
#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reason {
    /// Not an error: the word this accompanies is all-zero.
    Success = 0,
    /// An id did not resolve to a live object of the expected kind.
    BadId,
    /// A required pointer/buffer argument was null or zero-length.
    BadParam,
    /// The object exists but has not been initialized.
    Uninit,
    /// Caller attempted an operation requiring ownership it doesn't hold.
    NotOwner,
    /// A mutex's owner attempted to lock it again (recursion unsupported).
    Recursive,
    /// The call would need to block, but blocking isn't legal here
    /// (interrupt context, or a non-blocking `timeout_us == 0` try).
    WouldBlock,
    /// The blocking call's timeout elapsed before it completed. Not treated
    /// as a failure by callers; carried here purely as a reason code.
    Timeout,
    /// Caller was woken by an explicit interruption rather than by the
    /// condition it was waiting for.
    Interrupted,
    /// A fixed-capacity resource (queue, pool) was full.
    Full,
    /// A fixed-capacity resource (queue, pool, semaphore) was empty/exhausted.
    Empty,
    /// A timer is already armed and busy.
    Busy,
    /// An internal invariant was violated; see [`fault_hook`].
    Corrupted,
}

/// A packed kernel result: bit 31 = error, bits 30..24 = component, bits
/// 23..0 = reason. `Success` is the value `0`.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct StatusWord(u32);

impl StatusWord {
    pub const SUCCESS: StatusWord = StatusWord(0);

    #[inline]
    pub const fn ok() -> Self {
        Self::SUCCESS
    }

    #[inline]
    pub const fn err(component: Component, reason: Reason) -> Self {
        StatusWord(ERROR_BIT | ((component as u32) << COMPONENT_SHIFT) | (reason as u32))
    }

    /// Timeouts and interruption are reported through the same packed word
    /// as errors, but are not failures: callers branch on [`Reason`], not on
    /// [`StatusWord::is_err`], to tell a timeout from a precondition failure.
    #[inline]
    pub const fn timeout(component: Component) -> Self {
        Self::err(component, Reason::Timeout)
    }

    #[inline]
    pub const fn interrupted(component: Component) -> Self {
        Self::err(component, Reason::Interrupted)
    }

    #[inline]
    pub const fn is_ok(self) -> bool {
        self.0 & ERROR_BIT == 0
    }

    #[inline]
    pub const fn is_err(self) -> bool {
        !self.is_ok()
    }

    #[inline]
    pub const fn component(self) -> Component {
        decode_component(self.0)
    }

    #[inline]
    pub const fn reason(self) -> Reason {
        match self.0 & REASON_MASK {
            0 => Reason::Success,
            1 => Reason::BadId,
            2 => Reason::BadParam,
            3 => Reason::Uninit,
            4 => Reason::NotOwner,
            5 => Reason::Recursive,
            6 => Reason::WouldBlock,
            7 => Reason::Timeout,
            8 => Reason::Interrupted,
            9 => Reason::Full,
            10 => Reason::Empty,
            11 => Reason::Busy,
            _ => Reason::Corrupted,
        }
    }

    #[inline]
    pub const fn as_u32(self) -> u32 {
        self.0
    }

    #[inline]
    pub const fn from_u32(raw: u32) -> Self {
        StatusWord(raw)
    }

    /// Convert to a `Result`. Timeouts and interruption convert to `Err`
    /// like any other reason; callers that need to special-case them
    /// inspect [`Self::reason`] before converting.
    pub fn into_result(self) -> Result<(), KernelError> {
        if self.is_ok() {
            Ok(())
        } else {
            Err(KernelError {
                component: self.component(),
                reason: self.reason(),
            })
        }
    }
}

impl fmt::Debug for StatusWord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_ok() {
            write!(f, "StatusWord(Success)")
        } else {
            write!(f, "StatusWord({:?}, {:?})", self.component(), self.reason())
        }
    }
}

const fn decode_component(raw: u32) -> Component {
    match (raw & COMPONENT_MASK) >> COMPONENT_SHIFT {
        0 => Component::List,
        1 => Component::Registry,
        2 => Component::Timeout,
        3 => Component::Scheduler,
        4 => Component::Semaphore,
        5 => Component::Mutex,
        6 => Component::Event,
        7 => Component::Queue,
        8 => Component::Pool,
        9 => Component::Topic,
        10 => Component::Timer,
        _ => Component::Boot,
    }
}

/// Ergonomic counterpart to [`StatusWord`] for application code written
/// against `Result<T, KernelError>`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KernelError {
    pub component: Component,
    pub reason: Reason,
}

impl fmt::Display for KernelError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?} error in {:?}", self.reason, self.component)
    }
}

/// Reason a [`fault_hook`] was invoked: the "fatal" category of the error
/// taxonomy, conditions that indicate corrupted kernel state rather than an
/// ordinary recoverable failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FaultReason {
    StackOverflow,
    InvariantViolated,
    PrivilegedCallFromWrongContext,
}

/// Invoked when the kernel detects a condition it cannot recover from.
/// Never returns. The default implementation spins forever with interrupts
/// masked; a port may swap this out before boot to reset the MCU or drop
/// into a debugger instead.
pub fn fault_hook(reason: FaultReason, context: u32) -> ! {
    #[cfg(feature = "log")]
    log::error!("fault: {reason:?} (context={context:#x})");
    #[cfg(not(feature = "log"))]
    let _ = (reason, context);

    loop {
        core::hint::spin_loop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn success_is_all_zero() {
        assert_eq!(StatusWord::ok().as_u32(), 0);
        assert!(StatusWord::ok().is_ok());
    }

    #[test]
    fn round_trips_component_and_reason() {
        let w = StatusWord::err(Component::Mutex, Reason::NotOwner);
        assert!(w.is_err());
        assert_eq!(w.component(), Component::Mutex);
        assert_eq!(w.reason(), Reason::NotOwner);
    }

    #[test]
    fn timeout_is_not_plain_success_but_is_distinguishable() {
        let w = StatusWord::timeout(Component::Semaphore);
        assert_eq!(w.reason(), Reason::Timeout);
        assert_eq!(w.component(), Component::Semaphore);
    }

    #[test]
    fn into_result_maps_ok_and_err() {
        assert!(StatusWord::ok().into_result().is_ok());
        let e = StatusWord::err(Component::Queue, Reason::Full)
            .into_result()
            .unwrap_err();
        assert_eq!(e.reason, Reason::Full);
    }
}
