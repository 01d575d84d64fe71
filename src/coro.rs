//! # Stackful Asymmetric Coroutines
//!
//! A cooperative execution unit built purely on the context transfer
//! primitives; nothing here touches raw registers. Each coroutine owns
//! two context records: `exec`, its own resumable point, and `invoker`,
//! the place control returns to when it suspends or finishes. A
//! coroutine can only yield back to its invoker, never sideways to a
//! sibling.
//!
//! ## State Machine
//!
//! ```text
//!   ┌───────────┐      resume()      ┌─────────┐
//!   │ Suspended │ ─────────────────► │ Running │
//!   └───────────┘                    └─────────┘
//!        ▲                                │
//!        │           suspend()            │
//!        └───────────────────────────────┘
//!                                         │ entry fn returns
//!                                         ▼
//!                                    ┌─────────┐
//!                                    │  Dead   │  (terminal)
//!                                    └─────────┘
//! ```
//!
//! `Illegal` is not a real state: the query answers it for an absent
//! reference or a status byte outside the three legal values, instead of
//! failing.
//!
//! ## Data Exchange
//!
//! Every `resume`/`suspend` call optionally carries a channel, a mutable
//! reference to one opaque machine word. On entry the caller's value is
//! pushed into the coroutine's shared slot; on exit the slot's latest
//! value, written by the other side's matching call or by the entry
//! function's return on termination, is pulled back out. The one
//! mechanism covers the initial argument, every handoff in between, and
//! the final result. Passing `None` opts out of the exchange for that
//! call.
//!
//! ## Error Handling
//!
//! Unlike the raw primitives underneath, every entry point here
//! validates its preconditions and reports failure as a `Result`
//! without touching any state. There are no retries; the caller decides
//! what a failure means.

use core::ptr;

use crate::arch::port::{capture, prepare, swap, MachineContext};

// Stored status byte values. Anything else reads as `Illegal`.
const STATUS_SUSPENDED: u8 = 0;
const STATUS_RUNNING: u8 = 1;
const STATUS_DEAD: u8 = 2;
/// Seeded by `Coroutine::new` so an uninitialised record is visibly
/// illegal rather than accidentally resumable.
const STATUS_UNINIT: u8 = 0xFF;

/// Observable coroutine state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CoroState {
    /// Initialised and parked, waiting for `resume`.
    Suspended,
    /// Currently executing (or the invoker of something executing).
    Running,
    /// Entry function returned; will never run again.
    Dead,
    /// Not a real state: absent reference or corrupt status byte.
    Illegal,
}

/// Failure reported by the validating entry points.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    /// `init` was handed a null stack or a zero stack size.
    BadStack,
    /// The operation does not apply to the coroutine's current state.
    BadState,
}

/// Coroutine entry function: receives the coroutine itself (for
/// [`Coroutine::suspend`]) and the first resume's channel value; its
/// return value becomes the final channel value seen by the last resume.
pub type CoroFn = fn(&mut Coroutine, *mut ()) -> *mut ();

/// A unit of cooperative execution.
///
/// Plain data plus two context records; the library never allocates or
/// frees anything. Dropping a coroutine performs no cleanup, running or
/// not; the owner also owns the backing stack and its lifetime.
pub struct Coroutine {
    status: u8,
    /// Where control goes on suspend or death. Established lazily, by
    /// the swap inside each `resume`.
    invoker: MachineContext,
    /// The coroutine's own suspended point.
    exec: MachineContext,
    /// The shared data slot behind the channel contract.
    data: *mut (),
    func: Option<CoroFn>,
}

impl Coroutine {
    /// An uninitialised coroutine. Reads as [`CoroState::Illegal`] and
    /// refuses every operation until [`init`](Coroutine::init) runs.
    pub const fn new() -> Self {
        Self {
            status: STATUS_UNINIT,
            invoker: MachineContext::empty(),
            exec: MachineContext::empty(),
            data: ptr::null_mut(),
            func: None,
        }
    }

    /// Bind a stack and an entry function; status becomes `Suspended`.
    ///
    /// The entry function does not run yet. It is wrapped in an internal
    /// trampoline prepared with this coroutine's `invoker` record as
    /// successor, so that when `func` eventually returns, the coroutine
    /// is marked `Dead` and control lands back at the invoker's pending
    /// `resume`. Termination is just the successor mechanism.
    ///
    /// Fails with [`Error::BadStack`] if `stack` is null or `stack_size`
    /// is zero.
    ///
    /// # Safety
    /// - `stack..stack + stack_size` must be writable memory exclusively
    ///   owned by this coroutine until it is `Dead` and no record of it
    ///   can be activated again.
    /// - The `Coroutine` itself must not move between this call and its
    ///   death: the prepared context carries its address.
    /// - Re-initialising a coroutine that is `Running`, or whose old
    ///   stack is still reachable through some context, is undefined.
    pub unsafe fn init(
        &mut self,
        stack: *mut u8,
        stack_size: usize,
        func: CoroFn,
    ) -> Result<(), Error> {
        if stack.is_null() || stack_size == 0 {
            return Err(Error::BadStack);
        }
        let this = self as *mut Coroutine;
        self.func = Some(func);
        self.data = ptr::null_mut();
        unsafe {
            capture(&mut self.exec);
            prepare(
                &mut self.exec,
                stack,
                stack_size,
                &self.invoker,
                trampoline,
                this as *mut (),
            );
        }
        self.status = STATUS_SUSPENDED;
        Ok(())
    }

    /// Transfer control into the coroutine until it suspends or dies.
    ///
    /// The channel value (if any) is pushed into the shared slot before
    /// the transfer; when control comes back, the slot's latest value is
    /// pulled out through the same channel. The coroutine runs to its
    /// next `suspend` or to termination before this call returns; there
    /// is no other way back.
    ///
    /// Fails with [`Error::BadState`] unless the coroutine is
    /// `Suspended`, leaving everything untouched.
    pub fn resume(&mut self, channel: Option<&mut *mut ()>) -> Result<(), Error> {
        if self.status != STATUS_SUSPENDED {
            return Err(Error::BadState);
        }
        self.status = STATUS_RUNNING;
        self.data = match &channel {
            Some(slot) => **slot,
            None => ptr::null_mut(),
        };
        // While this frame is parked inside the swap, the coroutine body
        // mutates this record through the trampoline's alias; stay on a
        // raw pointer rather than trusting `self` across the transfer.
        let this = self as *mut Coroutine;
        unsafe {
            swap(&mut (*this).invoker, &(*this).exec);
            if let Some(slot) = channel {
                *slot = (*this).data;
            }
        }
        Ok(())
    }

    /// Suspend the running coroutine, handing control back to the
    /// invoker; the yield half of the exchange.
    ///
    /// Must be called from inside the coroutine's own entry function.
    /// The channel value is parked in the shared slot for the invoker's
    /// `resume` to collect; when some later `resume` re-enters, the
    /// slot's new value comes back out through the same channel.
    ///
    /// Fails with [`Error::BadState`] unless the coroutine is `Running`,
    /// leaving everything untouched.
    pub fn suspend(&mut self, channel: Option<&mut *mut ()>) -> Result<(), Error> {
        if self.status != STATUS_RUNNING {
            return Err(Error::BadState);
        }
        self.status = STATUS_SUSPENDED;
        self.data = match &channel {
            Some(slot) => **slot,
            None => ptr::null_mut(),
        };
        let this = self as *mut Coroutine;
        unsafe {
            swap(&mut (*this).exec, &(*this).invoker);
            if let Some(slot) = channel {
                *slot = (*this).data;
            }
        }
        Ok(())
    }

    /// The stored state, degrading to [`CoroState::Illegal`] for a
    /// status byte outside the legal range. Never fails, never mutates.
    pub fn state(&self) -> CoroState {
        match self.status {
            STATUS_SUSPENDED => CoroState::Suspended,
            STATUS_RUNNING => CoroState::Running,
            STATUS_DEAD => CoroState::Dead,
            _ => CoroState::Illegal,
        }
    }
}

/// State query over a possibly-absent reference: `None` answers
/// [`CoroState::Illegal`], anything else defers to
/// [`Coroutine::state`].
pub fn state(coro: Option<&Coroutine>) -> CoroState {
    match coro {
        Some(c) => c.state(),
        None => CoroState::Illegal,
    }
}

/// Runs on the coroutine's own stack as the prepared context's entry.
/// Invokes the entry function, banks its return value in the shared
/// slot, marks the coroutine `Dead`, and returns into the successor
/// chain, which installs the invoker context.
extern "C" fn trampoline(arg: *mut ()) {
    let coro = unsafe { &mut *(arg as *mut Coroutine) };
    if let Some(func) = coro.func {
        let input = coro.data;
        let output = func(coro, input);
        coro.data = output;
    }
    coro.status = STATUS_DEAD;
}

// ---------------------------------------------------------------------------
// Unit tests (host-only; the end-to-end cases run on the hosted port)
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use core::ptr::addr_of_mut;
    use core::sync::atomic::{AtomicUsize, Ordering};

    const STACK_LEN: usize = 64 * 1024;

    #[repr(align(16))]
    struct StackBlock([u8; STACK_LEN]);

    #[test]
    fn uninitialised_coroutine_is_illegal_and_inert() {
        let mut coro = Coroutine::new();
        assert_eq!(coro.state(), CoroState::Illegal);
        assert_eq!(state(Some(&coro)), CoroState::Illegal);
        assert_eq!(state(None), CoroState::Illegal);
        assert_eq!(coro.resume(None), Err(Error::BadState));
        assert_eq!(coro.suspend(None), Err(Error::BadState));
        assert_eq!(coro.state(), CoroState::Illegal);
    }

    #[test]
    fn init_validates_stack_arguments() {
        static mut STACK: StackBlock = StackBlock([0; STACK_LEN]);

        fn body(_me: &mut Coroutine, _arg: *mut ()) -> *mut () {
            ptr::null_mut()
        }

        let mut coro = Coroutine::new();
        unsafe {
            assert_eq!(
                coro.init(ptr::null_mut(), STACK_LEN, body),
                Err(Error::BadStack)
            );
            assert_eq!(
                coro.init(addr_of_mut!(STACK.0) as *mut u8, 0, body),
                Err(Error::BadStack)
            );
        }
        // Failed init leaves the record untouched.
        assert_eq!(coro.state(), CoroState::Illegal);
    }

    #[test]
    fn init_then_state_is_suspended() {
        static mut STACK: StackBlock = StackBlock([0; STACK_LEN]);

        fn body(_me: &mut Coroutine, _arg: *mut ()) -> *mut () {
            ptr::null_mut()
        }

        let mut coro = Coroutine::new();
        unsafe {
            coro.init(addr_of_mut!(STACK.0) as *mut u8, STACK_LEN, body)
                .unwrap();
        }
        assert_eq!(coro.state(), CoroState::Suspended);
        // Suspending something that is not running is refused.
        assert_eq!(coro.suspend(None), Err(Error::BadState));
        assert_eq!(coro.state(), CoroState::Suspended);
    }

    #[test]
    fn generator_yields_increasing_integers() {
        static mut STACK: StackBlock = StackBlock([0; STACK_LEN]);

        fn body(me: &mut Coroutine, _arg: *mut ()) -> *mut () {
            let mut n: usize = 0;
            loop {
                let mut slot = n as *mut ();
                let _ = me.suspend(Some(&mut slot));
                n += 1;
            }
        }

        let mut coro = Coroutine::new();
        unsafe {
            coro.init(addr_of_mut!(STACK.0) as *mut u8, STACK_LEN, body)
                .unwrap();
        }
        for expected in 0..5usize {
            let mut slot: *mut () = ptr::null_mut();
            coro.resume(Some(&mut slot)).unwrap();
            assert_eq!(slot as usize, expected);
            assert_eq!(coro.state(), CoroState::Suspended);
        }
    }

    #[test]
    fn channel_round_trips_unchanged() {
        static mut STACK: StackBlock = StackBlock([0; STACK_LEN]);

        // Echoes back whatever it received, forever.
        fn body(me: &mut Coroutine, arg: *mut ()) -> *mut () {
            let mut slot = arg;
            loop {
                let _ = me.suspend(Some(&mut slot));
            }
        }

        let mut coro = Coroutine::new();
        unsafe {
            coro.init(addr_of_mut!(STACK.0) as *mut u8, STACK_LEN, body)
                .unwrap();
        }
        for v in [0x1000usize, 42, usize::MAX - 3] {
            let mut slot = v as *mut ();
            coro.resume(Some(&mut slot)).unwrap();
            assert_eq!(slot as usize, v);
        }
    }

    #[test]
    fn termination_delivers_result_and_kills() {
        static mut STACK: StackBlock = StackBlock([0; STACK_LEN]);

        fn body(me: &mut Coroutine, _arg: *mut ()) -> *mut () {
            let mut slot = 10usize as *mut ();
            let _ = me.suspend(Some(&mut slot));
            20usize as *mut ()
        }

        let mut coro = Coroutine::new();
        unsafe {
            coro.init(addr_of_mut!(STACK.0) as *mut u8, STACK_LEN, body)
                .unwrap();
        }
        let mut slot: *mut () = ptr::null_mut();
        // First resume observes the yielded value.
        coro.resume(Some(&mut slot)).unwrap();
        assert_eq!(slot as usize, 10);
        assert_eq!(coro.state(), CoroState::Suspended);
        // Second resume observes the return value; the coroutine dies.
        coro.resume(Some(&mut slot)).unwrap();
        assert_eq!(slot as usize, 20);
        assert_eq!(coro.state(), CoroState::Dead);
        // Dead is terminal: nothing applies any more.
        assert_eq!(coro.resume(Some(&mut slot)), Err(Error::BadState));
        assert_eq!(coro.suspend(None), Err(Error::BadState));
        assert_eq!(coro.state(), CoroState::Dead);
    }

    #[test]
    fn resume_from_inside_the_body_is_refused() {
        static mut STACK: StackBlock = StackBlock([0; STACK_LEN]);

        fn body(me: &mut Coroutine, _arg: *mut ()) -> *mut () {
            // A running coroutine is not Suspended; resuming it from
            // within itself must fail without corrupting anything.
            let denied = me.resume(None).is_err();
            let mut slot = denied as usize as *mut ();
            let _ = me.suspend(Some(&mut slot));
            ptr::null_mut()
        }

        let mut coro = Coroutine::new();
        unsafe {
            coro.init(addr_of_mut!(STACK.0) as *mut u8, STACK_LEN, body)
                .unwrap();
        }
        let mut slot: *mut () = ptr::null_mut();
        coro.resume(Some(&mut slot)).unwrap();
        assert_eq!(slot as usize, 1);
        assert_eq!(coro.state(), CoroState::Suspended);
    }

    #[test]
    fn producer_consumer_interleave_in_order() {
        static mut PROD_STACK: StackBlock = StackBlock([0; STACK_LEN]);
        static mut CONS_STACK: StackBlock = StackBlock([0; STACK_LEN]);
        static SEQ: AtomicUsize = AtomicUsize::new(0);
        static EVENTS: [AtomicUsize; 10] = [const { AtomicUsize::new(0) }; 10];

        const PRODUCED: usize = 1000;
        const CONSUMED: usize = 2000;

        fn log(ev: usize) {
            EVENTS[SEQ.fetch_add(1, Ordering::SeqCst)].store(ev, Ordering::SeqCst);
        }

        fn producer(me: &mut Coroutine, _arg: *mut ()) -> *mut () {
            for n in 0..5usize {
                log(PRODUCED + n);
                let mut slot = n as *mut ();
                let _ = me.suspend(Some(&mut slot));
            }
            ptr::null_mut()
        }

        fn consumer(me: &mut Coroutine, arg: *mut ()) -> *mut () {
            let mut slot = arg;
            loop {
                log(CONSUMED + slot as usize);
                let _ = me.suspend(Some(&mut slot));
            }
        }

        let mut prod = Coroutine::new();
        let mut cons = Coroutine::new();
        unsafe {
            prod.init(addr_of_mut!(PROD_STACK.0) as *mut u8, STACK_LEN, producer)
                .unwrap();
            cons.init(addr_of_mut!(CONS_STACK.0) as *mut u8, STACK_LEN, consumer)
                .unwrap();
        }
        for n in 0..5usize {
            let mut slot: *mut () = ptr::null_mut();
            prod.resume(Some(&mut slot)).unwrap();
            assert_eq!(slot as usize, n);
            let mut handoff = slot;
            cons.resume(Some(&mut handoff)).unwrap();
        }
        // Each item is produced immediately before it is consumed, in
        // strictly increasing order.
        for n in 0..5usize {
            let p = EVENTS[2 * n].load(Ordering::SeqCst);
            let c = EVENTS[2 * n + 1].load(Ordering::SeqCst);
            assert_eq!(p, PRODUCED + n);
            assert_eq!(c, CONSUMED + n);
        }
    }
}
