//! Purpose: Library crate behind the `linelog` daemon and its tests.
//! Exports: `core` (slotted store, media, framing, commands, errors), `serve` (TCP server).
//! Role: Internal library backing the binary; not a stable public SDK.
//! Invariants: `core` is free of sockets and threads; `serve` owns all concurrency.
pub mod core;
pub mod serve;
