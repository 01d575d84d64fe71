//! # mctx — Machine-Context Switching and Stackful Coroutines
//!
//! A minimal execution-context-switching substrate for single-core
//! bare-metal targets, plus an asymmetric stackful coroutine layer on
//! top. One physical CPU core multiplexes several independent call
//! stacks with no operating system underneath: the full visible machine
//! state (status flags, register file, program counter, stack pointer)
//! is saved into and restored from an opaque, relocatable record.
//!
//! ## Overview
//!
//! Four primitives move state between the CPU and a [`MachineContext`]
//! record:
//!
//! - [`capture`] — snapshot the currently executing state
//! - [`install`] — make a record the running state; never returns
//! - [`swap`] — capture and install as one logically atomic step
//! - [`prepare`] — aim a captured record at a fresh entry function,
//!   stack and successor context
//!
//! On top of these, and of nothing lower, [`Coroutine`] implements
//! cooperative suspend/resume with a two-way data channel. Alongside
//! them, the interrupt-safe fragments in `isr` do the same save/restore
//! job from inside a naked interrupt handler through a global pointer
//! slot, which is the hook a preemptive scheduler builds on.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │                    Application Code                       │
//! ├────────────────────────────┬─────────────────────────────┤
//! │   Coroutine Layer (coro)   │   Hardware Interrupt         │
//! │   init · resume · suspend  │      │                       │
//! │   state · channel slot     │      ▼                       │
//! ├────────────────────────────┤   Interrupt-Safe Switch      │
//! │   Context Primitives       │   (isr)                      │
//! │   capture · install        │   isr_save_context!          │
//! │   swap · prepare           │   isr_restore_context!       │
//! ├────────────────────────────┴─────────────────────────────┤
//! │              MachineContext (arch port layer)             │
//! │     xPSR · PRIMASK · R0–R12 · LR · PC · SP  (Cortex-M4)   │
//! └──────────────────────────────────────────────────────────┘
//! ```
//!
//! The interrupt path bypasses the coroutine layer entirely; the two
//! meet only at the record type.
//!
//! ## Two Tiers of Safety
//!
//! The primitives validate nothing and report nothing: bad input is
//! undefined behaviour, deliberately, because they sit on hot paths of
//! resource-constrained targets. The coroutine layer checks every
//! precondition and reports failure as a `Result`. Pick the tier that
//! fits.
//!
//! ## Memory Model
//!
//! - **No heap**: the crate never allocates; stacks and records are
//!   caller-owned
//! - **No `alloc`**: pure `core`
//! - **Stacks are never shared**: each context exclusively owns its
//!   backing memory for its whole lifetime; reuse while the context is
//!   still reachable anywhere is undefined
//! - **Single core**: one context runs at a time; the interrupt-safe
//!   switch is the only source of asynchronous preemption

#![no_std]

pub mod arch;
pub mod coro;
#[cfg(all(target_arch = "arm", target_os = "none"))]
pub mod isr;
#[cfg(all(target_arch = "arm", target_os = "none"))]
pub mod sync;

pub use arch::port::{capture, install, prepare, swap, EntryFn, MachineContext};
pub use coro::{state, CoroFn, CoroState, Coroutine, Error};
#[cfg(all(target_arch = "arm", target_os = "none"))]
pub use isr::ContextCell;
