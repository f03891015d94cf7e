//! The redirfs preload library.
//!
//! Built as `libredirfs.so` and loaded ahead of the C library with
//! `LD_PRELOAD`. Every exported function below carries the name of a libc
//! entry point. Calls on paths under a configured mount, or on descriptors,
//! streams and directory streams opened through one, are served by the
//! backend. Everything else is handed to the next definition of the symbol.
//!
//! Variadic entry points (`open`, `open64`, `fcntl`, `fcntl64`) are exported
//! with a fixed trailing argument, which the C calling conventions on the
//! supported targets pass in the same register as the first variadic
//! argument.

#![allow(clippy::missing_safety_doc)]
#![cfg_attr(test, allow(dead_code))]

#[macro_use]
mod state;
mod guard;

// A unit-test binary linking these would interpose its own I/O; they are
// exercised through the built library by the tests under `tests/`.
#[cfg(not(test))]
mod dir;
#[cfg(not(test))]
mod io;
#[cfg(not(test))]
mod meta;
#[cfg(not(test))]
mod stream;
