//! # Synchronization Primitives
//!
//! Interrupt-safe critical section abstraction for the Cortex-M4. The
//! global context slot used by the interrupt-safe switch must only be
//! written while interrupts that could observe it are disabled; this
//! module is how that is done.

use cortex_m::interrupt;

/// Execute a closure within a critical section (interrupts disabled).
///
/// Interrupts are disabled on entry and restored on exit, making the
/// enclosed operation atomic with respect to the interrupt domain.
/// Keep the body short: every cycle spent here adds interrupt latency.
#[inline]
pub fn critical_section<F, R>(f: F) -> R
where
    F: FnOnce(&interrupt::CriticalSection) -> R,
{
    interrupt::free(f)
}
