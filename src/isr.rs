//! # Interrupt-Safe Context Switch
//!
//! Save/restore fragments with the same record semantics as
//! [`capture`](crate::arch::cortex_m4::capture) and
//! [`install`](crate::arch::cortex_m4::install), but shaped for a naked
//! interrupt handler: a routine that receives control with no
//! compiler-generated prologue or epilogue and must account for every
//! register itself.
//!
//! On exception entry the Cortex-M4 has already stacked R0–R3, R12, LR,
//! PC and xPSR. The save fragment merges that hardware frame with the
//! software-saved R4–R11 and PRIMASK into a full [`MachineContext`]; the
//! restore fragment rebuilds an exception frame from a record and lets
//! the return-from-exception instruction become the activation of that
//! context. Between the two fragments arbitrary code may run, because
//! the interrupted context is already fully captured. That gap is where
//! a consumer makes its scheduling decision and repoints the context
//! slot at a different record; the handler then returns into a different
//! thread of control, which is what makes preemptive multitasking
//! possible on top of this crate.
//!
//! ## The Context Slot
//!
//! Both fragments find their target record through a single
//! pointer-width location holding the address of the context that
//! belongs to whichever thread of control is currently running.
//! [`ContextCell`] is that location: the consumer owns the static, binds
//! it to the fragments as a `sym` operand named `context_slot`, writes
//! it only through [`ContextCell::set`] (which runs inside a critical
//! section), and must repoint it at most once per save/restore pair.
//!
//! ## Usage
//!
//! The fragments expand to template strings for a single
//! [`naked_asm!`](core::arch::naked_asm) invocation:
//!
//! ```ignore
//! use mctx::{isr_restore_context_via_slot, isr_save_context_via_slot, ContextCell};
//!
//! static CURRENT: ContextCell = ContextCell::empty();
//!
//! extern "C" fn pick_next() {
//!     // Runs with the interrupted context fully saved; may call
//!     // CURRENT.set(..) to select a different record to resume.
//! }
//!
//! #[unsafe(no_mangle)]
//! #[unsafe(naked)]
//! unsafe extern "C" fn SysTick() {
//!     core::arch::naked_asm!(
//!         isr_save_context_via_slot!(presave: "cpsid i"),
//!         "bl {next}",
//!         isr_restore_context_via_slot!(),
//!         context_slot = sym CURRENT,
//!         next = sym pick_next,
//!     );
//! }
//! ```
//!
//! ## Assumptions
//!
//! Single core; thread mode running on MSP (the restore fragment issues
//! EXC_RETURN `0xFFFFFFF9`); basic 8-word exception frames, so no active
//! FPU context in the interrupted code; CCR.STKALIGN at its reset value.
//! The fragments handle the frame-padding case (xPSR bit 9) in both
//! directions.

use core::cell::UnsafeCell;

use crate::arch::port::MachineContext;
use crate::sync;

// ---------------------------------------------------------------------------
// Context slot
// ---------------------------------------------------------------------------

/// Single-writer cell holding the running thread of control's context
/// record address.
///
/// This is the one shared mutable resource between the interrupt domain
/// and everything else, so the rules are narrow: the cell must not be
/// aliased by unrelated subsystems, writes go through [`set`] (interrupts
/// disabled for the duration), and a scheduling decision repoints it at
/// most once between a completed save and the following restore.
///
/// `#[repr(transparent)]` over the raw pointer, so the `sym` operand the
/// fragments receive addresses the pointer storage directly.
///
/// [`set`]: ContextCell::set
#[repr(transparent)]
pub struct ContextCell(UnsafeCell<*mut MachineContext>);

// One core, writes serialized by the critical section in `set`.
unsafe impl Sync for ContextCell {}

impl ContextCell {
    /// A cell holding no context. The fragments must not run until the
    /// cell points at a real record.
    pub const fn empty() -> Self {
        Self(UnsafeCell::new(core::ptr::null_mut()))
    }

    /// Point the cell at `ctx`, within a critical section.
    pub fn set(&self, ctx: *mut MachineContext) {
        sync::critical_section(|_| unsafe { self.0.get().write_volatile(ctx) });
    }

    /// Read the current record address.
    pub fn get(&self) -> *mut MachineContext {
        unsafe { self.0.get().read_volatile() }
    }
}

// ---------------------------------------------------------------------------
// Save fragment
// ---------------------------------------------------------------------------

/// Capture the interrupted context into the record located by `locate`.
///
/// Expands to a template-string fragment for the start of a naked
/// handler's `naked_asm!` block. The record layout is the `OFF_*` table
/// in `arch::cortex_m4`; the literals here are pinned by the assertions
/// there.
///
/// Injected code contract:
///
/// - `presave` runs immediately after PRIMASK has been read into R1 and
///   before anything is stored. Its designed use is `"cpsid i"`, so the
///   save cannot itself be interrupted yet the record still carries the
///   interrupted thread's own mask state. It must leave every register
///   and SP alone.
/// - `locate` (one or more instruction literals) must leave the record's
///   address in R0. It may clobber R2 and R3, and must preserve R1,
///   R4–R11 and SP. The hardware frame already holds the interrupted
///   R0–R3 and R12, which is why the fragment is free to use them.
///
/// After the fragment, R0–R3 and R12 hold scratch; LR no longer holds
/// the original EXC_RETURN (the restore fragment rebuilds it). Calling
/// an ordinary function next is fine: the record is complete, and AAPCS
/// keeps R4–R11 and SP intact across the call.
#[macro_export]
macro_rules! isr_save_context {
    (presave: $presave:literal, locate: $($locate:literal),+ $(,)?) => {
        concat!(
            // Mask state first; the presave hook is allowed to change it.
            "mrs r1, primask\n",
            $presave, "\n",
            $($locate, "\n",)+
            "str r1, [r0, #4]\n",       // primask
            // Software-saved half of the file.
            "add.w r2, r0, #24\n",      // r[4]
            "stmia r2, {{r4-r11}}\n",
            // Hardware frame: r0-r3, r12, lr, pc, xpsr.
            "ldr r1, [sp, #0]\n",
            "str r1, [r0, #8]\n",       // r[0]
            "ldr r1, [sp, #4]\n",
            "str r1, [r0, #12]\n",      // r[1]
            "ldr r1, [sp, #8]\n",
            "str r1, [r0, #16]\n",      // r[2]
            "ldr r1, [sp, #12]\n",
            "str r1, [r0, #20]\n",      // r[3]
            "ldr r1, [sp, #16]\n",
            "str r1, [r0, #56]\n",      // r[12]
            "ldr r1, [sp, #20]\n",
            "str r1, [r0, #60]\n",      // lr
            "ldr r1, [sp, #24]\n",
            "orr.w r1, r1, #1\n",       // records store BX-target form
            "str r1, [r0, #64]\n",      // pc
            "ldr r1, [sp, #28]\n",
            "str r1, [r0, #0]\n",       // xpsr
            // Pre-exception SP: frame plus the pad word, if bit 9 says
            // the hardware realigned.
            "ubfx r2, r1, #9, #1\n",
            "add.w r1, sp, #32\n",
            "add.w r1, r1, r2, lsl #2\n",
            "str r1, [r0, #68]\n",      // sp
        )
    };
}

/// [`isr_save_context!`] locating the record through a [`ContextCell`]
/// bound as `context_slot = sym ..`.
#[macro_export]
macro_rules! isr_save_context_via_slot {
    () => {
        $crate::isr_save_context_via_slot!(presave: "")
    };
    (presave: $presave:literal) => {
        $crate::isr_save_context!(
            presave: $presave,
            locate: "movw r0, :lower16:{context_slot}",
                    "movt r0, :upper16:{context_slot}",
                    "ldr r0, [r0]",
        )
    };
}

// ---------------------------------------------------------------------------
// Restore fragment
// ---------------------------------------------------------------------------

/// Activate the context in the record located by `locate` by returning
/// from the exception into it.
///
/// Builds an exception frame for the record's state on the record's own
/// stack, restores R4–R11 and PRIMASK, and issues the exception return.
/// The frame base is placed so that the hardware's unstacking, including
/// the pad-word adjustment for xPSR bit 9, lands SP exactly on the
/// record's saved value.
///
/// `locate` must leave the record's address in R0 and may clobber R1–R3.
/// Must be the tail of the handler: nothing runs after it.
#[macro_export]
macro_rules! isr_restore_context {
    (locate: $($locate:literal),+ $(,)?) => {
        concat!(
            $($locate, "\n",)+
            "add.w r1, r0, #24\n",      // r[4]
            "ldmia r1, {{r4-r11}}\n",
            // Frame base := saved sp, minus the pad word when bit 9 is
            // set, minus the 8-word frame.
            "ldr r1, [r0, #68]\n",      // sp
            "ldr r2, [r0, #0]\n",       // xpsr
            "ubfx r3, r2, #9, #1\n",
            "sub.w r1, r1, r3, lsl #2\n",
            "sub.w r1, r1, #32\n",
            "str r2, [r1, #28]\n",      // xpsr
            "ldr r2, [r0, #8]\n",
            "str r2, [r1, #0]\n",       // r0
            "ldr r2, [r0, #12]\n",
            "str r2, [r1, #4]\n",       // r1
            "ldr r2, [r0, #16]\n",
            "str r2, [r1, #8]\n",       // r2
            "ldr r2, [r0, #20]\n",
            "str r2, [r1, #12]\n",      // r3
            "ldr r2, [r0, #56]\n",
            "str r2, [r1, #16]\n",      // r12
            "ldr r2, [r0, #60]\n",
            "str r2, [r1, #20]\n",      // lr
            "ldr r2, [r0, #64]\n",
            "bic r2, r2, #1\n",         // frame wants the raw address
            "str r2, [r1, #24]\n",      // pc
            "mov sp, r1\n",
            "ldr r2, [r0, #4]\n",
            "msr primask, r2\n",
            // Thread mode, main stack, no FPU frame.
            "mvn lr, #6\n",
            "bx lr\n",
        )
    };
}

/// [`isr_restore_context!`] locating the record through a
/// [`ContextCell`] bound as `context_slot = sym ..`.
#[macro_export]
macro_rules! isr_restore_context_via_slot {
    () => {
        $crate::isr_restore_context!(
            locate: "movw r0, :lower16:{context_slot}",
                    "movt r0, :upper16:{context_slot}",
                    "ldr r0, [r0]",
        )
    };
}
