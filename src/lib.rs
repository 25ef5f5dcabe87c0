#![warn(missing_docs, missing_debug_implementations, rust_2018_idioms)]

//! # window-buffers: back-buffer pooling for X11-to-Wayland bridges
//!
//! An X11 server running as a Wayland client cannot hand its one canonical
//! window pixmap to the compositor and keep drawing into it at the same time.
//! Instead it keeps a small per-window pool of backing buffers: each commit
//! picks (or allocates) a free buffer, copies forward only the rectangles
//! dirtied since that buffer was last shown, swaps it in as the new window
//! pixmap and hands the previous one to the compositor until it is released.
//!
//! This crate implements that lifecycle (the pool, the damage coalescing,
//! the refcounted release path, idle-buffer eviction and the per-window
//! commit state machine) independent of any particular protocol binding.
//! The pieces this crate deliberately does *not* provide are reachable
//! through three seams:
//!
//! - [`backing::StorageBackend`] decides where pixel memory comes from. An
//!   in-memory implementation is provided in [`backing::memory`]; dmabuf or
//!   shm-pool backed stores plug in the same way.
//! - [`scheduler::Presenter`] decides how a flushed buffer reaches the
//!   compositor.
//! - [`scheduler::release`] carries asynchronous "buffer free" notifications
//!   back into the single-threaded event loop, either as messages on a
//!   [`calloop`] channel or as an eventfd-backed release fence.
//!
//! ## The event loop and state handling
//!
//! Everything here is single-threaded and cooperative, built around
//! [`calloop`]: pool and scheduler operations run to completion between
//! event-loop callbacks, and ordering between damage, commits, releases and
//! eviction is provided by the loop itself. The expected driving pattern is
//! one call to [`scheduler::CommitScheduler::dispatch_commits`] per loop
//! iteration, typically from an idle or pre-poll callback.
//!
//! ## Logging
//!
//! This crate makes extensive use of [`tracing`] for its internal logging.
//! Pool churn is logged at trace level, lifecycle events at debug level and
//! degraded fallback paths at warn level.

pub mod backing;
pub mod pool;
pub mod scheduler;
pub mod utils;
