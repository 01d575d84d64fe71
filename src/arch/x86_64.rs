//! # Hosted x86-64 Port Layer
//!
//! A userspace port of the context record and the four transfer
//! primitives for x86-64 (System V ABI). It exists so the coroutine
//! layer and its full behavioural test suite run as ordinary host tests;
//! the semantics are identical to the Cortex-M4 port. The interrupt-safe
//! fragments have no hosted counterpart since there is no exception
//! frame to merge.
//!
//! The record keeps the complete general-purpose file, not just the
//! callee-saved subset a cooperative switch would need, so that a record
//! means the same thing on every port: the full visible machine state.
//!
//! Offsets in the assembly below are written as literals against the
//! `OFF_*` table; the `const` assertions pin that table to the struct
//! layout, and the table doubles as the one place to read the layout.

use core::arch::naked_asm;
use core::mem::{offset_of, size_of};

// ---------------------------------------------------------------------------
// Machine context record
// ---------------------------------------------------------------------------

/// One complete snapshot of CPU-visible execution state.
///
/// Plain data, byte-copyable, no destructor. Populated only by
/// [`capture`], [`swap`] or [`prepare`]; installing an empty record is
/// undefined. See the Cortex-M4 port for the full contract; the two
/// records differ only in field widths and register naming.
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct MachineContext {
    /// RFLAGS at capture time.
    pub rflags: u64,
    /// General-purpose register file, indexed by the `REG_*` constants:
    /// RAX, RBX, RCX, RDX, RSI, RDI, RBP, R8–R15.
    pub r: [u64; 15],
    /// Resume address.
    pub rip: u64,
    /// Stack pointer.
    pub rsp: u64,
}

impl MachineContext {
    /// An empty (all-zero) record; storage only, never installable as-is.
    pub const fn empty() -> Self {
        Self {
            rflags: 0,
            r: [0; 15],
            rip: 0,
            rsp: 0,
        }
    }
}

/// Entry function signature accepted by [`prepare`].
pub type EntryFn = extern "C" fn(*mut ());

// Indices into `MachineContext::r`.
pub const REG_RAX: usize = 0;
pub const REG_RBX: usize = 1;
pub const REG_RCX: usize = 2;
pub const REG_RDX: usize = 3;
pub const REG_RSI: usize = 4;
pub const REG_RDI: usize = 5;
pub const REG_RBP: usize = 6;
pub const REG_R8: usize = 7;
pub const REG_R15: usize = 14;

// ---------------------------------------------------------------------------
// Record layout constants
// ---------------------------------------------------------------------------

/// Byte offset of `rflags`.
pub const OFF_RFLAGS: usize = 0;
/// Byte offset of `r[0]` (RAX); `r[n]` lives at `OFF_RAX + 8 * n`.
pub const OFF_RAX: usize = 8;
/// Byte offset of `r[REG_RDI]`.
pub const OFF_RDI: usize = 48;
/// Byte offset of `rip`.
pub const OFF_RIP: usize = 128;
/// Byte offset of `rsp`.
pub const OFF_RSP: usize = 136;
/// Total record size in bytes.
pub const CONTEXT_SIZE: usize = 144;

const _: () = {
    assert!(offset_of!(MachineContext, rflags) == OFF_RFLAGS);
    assert!(offset_of!(MachineContext, r) == OFF_RAX);
    assert!(OFF_RDI == OFF_RAX + 8 * REG_RDI);
    assert!(offset_of!(MachineContext, rip) == OFF_RIP);
    assert!(offset_of!(MachineContext, rsp) == OFF_RSP);
    assert!(size_of::<MachineContext>() == CONTEXT_SIZE);
};

// ---------------------------------------------------------------------------
// capture / install / swap
// ---------------------------------------------------------------------------

/// Write the currently executing state into `ctx`.
///
/// Returns normally; a later [`install`] or [`swap`] of `ctx` resumes
/// just after this call. RAX is saved before being used as scratch and
/// reloaded before returning, so the register file is left untouched.
///
/// # Safety
/// `ctx` must be valid for writes of [`CONTEXT_SIZE`] bytes. Nothing
/// else is checked.
#[unsafe(naked)]
pub unsafe extern "C" fn capture(ctx: *mut MachineContext) {
    naked_asm!(
        "mov [rdi + 8], rax",    // r[RAX]
        "mov [rdi + 16], rbx",   // r[RBX]
        "mov [rdi + 24], rcx",   // r[RCX]
        "mov [rdi + 32], rdx",   // r[RDX]
        "mov [rdi + 40], rsi",   // r[RSI]
        "mov [rdi + 48], rdi",   // r[RDI]
        "mov [rdi + 56], rbp",   // r[RBP]
        "mov [rdi + 64], r8",
        "mov [rdi + 72], r9",
        "mov [rdi + 80], r10",
        "mov [rdi + 88], r11",
        "mov [rdi + 96], r12",
        "mov [rdi + 104], r13",
        "mov [rdi + 112], r14",
        "mov [rdi + 120], r15",
        "pushfq",
        "pop qword ptr [rdi + 0]", // rflags
        "mov rax, [rsp]",          // return address doubles as resume RIP
        "mov [rdi + 128], rax",
        "lea rax, [rsp + 8]",      // stack pointer as of the return
        "mov [rdi + 136], rax",
        "mov rax, [rdi + 8]",
        "ret",
    );
}

/// Make `ctx` the running state. Never returns to its caller.
///
/// The resume address and saved RFLAGS are parked on the target stack,
/// the register file is rebuilt (RDI last, since it addresses the
/// record), and the final `ret` is the transfer. The two transient words
/// below the record's RSP are dead memory by the ABI at every resume
/// point, so repeated installs of one record are fine.
///
/// # Safety
/// `ctx` must hold a fully populated context whose backing stack is
/// still exclusively owned by it. Nothing is checked.
#[unsafe(naked)]
pub unsafe extern "C" fn install(ctx: *const MachineContext) -> ! {
    naked_asm!(
        "mov rsp, [rdi + 136]",      // rsp
        "push qword ptr [rdi + 128]", // rip, consumed by the final ret
        "push qword ptr [rdi + 0]",   // rflags
        "popfq",
        "mov rax, [rdi + 8]",
        "mov rbx, [rdi + 16]",
        "mov rcx, [rdi + 24]",
        "mov rdx, [rdi + 32]",
        "mov rsi, [rdi + 40]",
        "mov rbp, [rdi + 56]",
        "mov r8, [rdi + 64]",
        "mov r9, [rdi + 72]",
        "mov r10, [rdi + 80]",
        "mov r11, [rdi + 88]",
        "mov r12, [rdi + 96]",
        "mov r13, [rdi + 104]",
        "mov r14, [rdi + 112]",
        "mov r15, [rdi + 120]",
        "mov rdi, [rdi + 48]",
        "ret",
    );
}

/// Save the current state into `save_into`, then install `activate`, as
/// one logically atomic step. Returns when something later activates
/// `save_into`. Same-record arguments are undefined; debug builds assert
/// against it.
///
/// # Safety
/// As for [`capture`] plus [`install`], and the records must be
/// distinct. Nothing is checked in release builds.
#[inline]
pub unsafe fn swap(save_into: *mut MachineContext, activate: *const MachineContext) {
    debug_assert!(save_into as *const MachineContext != activate);
    unsafe { swap_raw(save_into, activate) }
}

/// Save half as in [`capture`] (RSI holds `activate`, which is its
/// caller-visible value), then the restore half of [`install`] against
/// the second record.
#[unsafe(naked)]
unsafe extern "C" fn swap_raw(save_into: *mut MachineContext, activate: *const MachineContext) {
    naked_asm!(
        // Save the current state into the record at RDI.
        "mov [rdi + 8], rax",
        "mov [rdi + 16], rbx",
        "mov [rdi + 24], rcx",
        "mov [rdi + 32], rdx",
        "mov [rdi + 40], rsi",
        "mov [rdi + 48], rdi",
        "mov [rdi + 56], rbp",
        "mov [rdi + 64], r8",
        "mov [rdi + 72], r9",
        "mov [rdi + 80], r10",
        "mov [rdi + 88], r11",
        "mov [rdi + 96], r12",
        "mov [rdi + 104], r13",
        "mov [rdi + 112], r14",
        "mov [rdi + 120], r15",
        "pushfq",
        "pop qword ptr [rdi + 0]",
        "mov rax, [rsp]",
        "mov [rdi + 128], rax",
        "lea rax, [rsp + 8]",
        "mov [rdi + 136], rax",
        // Switch targets, then restore as install does.
        "mov rdi, rsi",
        "mov rsp, [rdi + 136]",
        "push qword ptr [rdi + 128]",
        "push qword ptr [rdi + 0]",
        "popfq",
        "mov rax, [rdi + 8]",
        "mov rbx, [rdi + 16]",
        "mov rcx, [rdi + 24]",
        "mov rdx, [rdi + 32]",
        "mov rsi, [rdi + 40]",
        "mov rbp, [rdi + 56]",
        "mov r8, [rdi + 64]",
        "mov r9, [rdi + 72]",
        "mov r10, [rdi + 80]",
        "mov r11, [rdi + 88]",
        "mov r12, [rdi + 96]",
        "mov r13, [rdi + 104]",
        "mov r14, [rdi + 112]",
        "mov r15, [rdi + 120]",
        "mov rdi, [rdi + 48]",
        "ret",
    );
}

// ---------------------------------------------------------------------------
// prepare
// ---------------------------------------------------------------------------

/// Redirect a captured context at a fresh entry function and stack.
///
/// Same contract as the Cortex-M4 port: `ctx` must hold a captured
/// state; activation runs `entry(arg)` on the given stack; when `entry`
/// returns, `successor` is installed. Shim arguments travel in RDI, RSI
/// and RDX, the first three System V argument registers.
///
/// The stack top is rounded down to 16 bytes and then biased by one
/// word, so the shim starts with the alignment an ordinary `call` would
/// have produced.
///
/// # Safety
/// As for the Cortex-M4 port's `prepare`: captured `ctx`, exclusively
/// owned stack, successor valid before first activation and for as long
/// as `ctx` might run.
pub unsafe fn prepare(
    ctx: &mut MachineContext,
    stack: *mut u8,
    stack_size: usize,
    successor: *const MachineContext,
    entry: EntryFn,
    arg: *mut (),
) {
    let top = (stack as usize + stack_size) & !15;
    let shim: extern "C" fn(*const MachineContext, EntryFn, *mut ()) -> ! = run_and_chain;
    ctx.rsp = (top - 8) as u64;
    ctx.rip = shim as usize as u64;
    ctx.r[REG_RDI] = successor as u64;
    ctx.r[REG_RSI] = entry as usize as u64;
    ctx.r[REG_RDX] = arg as u64;
}

/// First and only frame of a prepared context. Runs the entry function,
/// then consumes the successor reference. Reached only through context
/// activation.
extern "C" fn run_and_chain(successor: *const MachineContext, entry: EntryFn, arg: *mut ()) -> ! {
    entry(arg);
    unsafe { install(successor) }
}

// ---------------------------------------------------------------------------
// Unit tests (the behavioural suite for the primitives)
// ---------------------------------------------------------------------------
