//! # redirfs Core
//!
//! The core library for redirfs - a transparent interposition layer that routes
//! ordinary POSIX file I/O to an alternate storage backend whenever the target
//! path falls under a configured mount prefix, while every other path behaves
//! exactly as the native operating system would.
//!
//! ## Overview
//!
//! An application linked against (or preloaded with) the redirfs shared object
//! keeps calling `open`, `read`, `write`, `opendir` and friends. For each call
//! the [`dispatch::Dispatcher`] canonicalizes the path, classifies it against
//! the [`registry::MountRegistry`], and either declines (the caller forwards the
//! call verbatim to the native symbol) or services it through a [`Backend`].
//!
//! Backend-bound files still hand the caller a real OS descriptor: it is backed
//! by an anonymous temporary file and used only for its identity and its seek
//! position. A second "passthrough" descriptor opened against the backend's
//! mounted view serves small reads, while large reads and all writes go through
//! the backend verbs. The dispatcher keeps the three positions in step.
//!
//! ## Basic Usage
//!
//! ```rust,ignore
//! use redirfs_core::backend::LocalBackend;
//! use redirfs_core::dispatch::Dispatcher;
//! use redirfs_core::native::System;
//! use redirfs_core::registry::MountRegistry;
//! use redirfs_core::types::ConfigSources;
//! use std::sync::Arc;
//!
//! let registry = Arc::new(MountRegistry::new(ConfigSources::from_env()));
//! let shim = Dispatcher::new(LocalBackend::new(registry.clone()), System, registry);
//!
//! match shim.open("/mnt/plfs/out.dat", libc::O_CREAT | libc::O_WRONLY, 0o644) {
//!     Some(Ok(fd)) => { /* backend-bound descriptor */ }
//!     Some(Err(e)) => { /* backend failure, e.errno() */ }
//!     None => { /* not managed: call the native open */ }
//! }
//! ```
//!
//! ## Architecture
//!
//! - [`native`]: resolution of the next native symbols and the [`Native`] trait
//! - [`types`]: paths, flags, attributes, mount entries and configuration sources
//! - [`registry`]: the lazily loaded mount-prefix registry
//! - [`backend`]: backend results and the shipped [`backend::LocalBackend`]
//! - [`table`]: the descriptor and directory tables
//! - [`dispatch`]: the per-call routing and offset synchronization
//! - [`stats`]: counters of routed operations

pub mod backend;
pub mod dispatch;
pub mod error;
pub mod native;
pub mod registry;
pub mod retry;
pub mod stats;
pub mod table;
pub mod traits;
pub mod types;

pub use error::{RedirError, Result};
pub use native::Native;
pub use traits::Backend;
