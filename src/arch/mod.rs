//! # Architecture Port Layer
//!
//! Exactly one port is compiled per build and re-exported as `port`:
//! the Cortex-M4 port on bare-metal ARM, and a hosted x86-64 port that
//! exists to run the behavioural test suite on a development machine.
//! Every port exposes the same surface: `MachineContext`, `EntryFn`,
//! `capture`, `install`, `swap` and `prepare`.

#[cfg(all(target_arch = "arm", target_os = "none"))]
pub mod cortex_m4;
#[cfg(all(target_arch = "arm", target_os = "none"))]
pub use cortex_m4 as port;

#[cfg(all(target_arch = "x86_64", not(target_os = "none")))]
pub mod x86_64;
#[cfg(all(target_arch = "x86_64", not(target_os = "none")))]
pub use x86_64 as port;

#[cfg(not(any(
    all(target_arch = "arm", target_os = "none"),
    all(target_arch = "x86_64", not(target_os = "none")),
)))]
compile_error!(
    "mctx has no port for this target; supported: ARM Cortex-M4 (thumbv7em-none-eabi) \
     and hosted x86-64"
);
