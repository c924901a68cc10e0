//! Content library controller.
//!
//! Reconciles declared content library resources against a backing provider
//! and reports convergence through the status model in [`contentlib_api`].
//!
//! # Components
//!
//! - **Provider** ([`provider`]): the backing platform seam, with an
//!   in-memory implementation supporting fault injection
//! - **Store** ([`store`]): resource storage with atomic status replacement
//!   and change notifications
//! - **Reconcilers** ([`reconciler`]): one observation cycle per resource
//! - **Controller** ([`controller`]): work queue, watch, resync and workers
//!
//! # Cycle
//!
//! ```text
//! watch/resync ──▶ queue ──▶ worker ──▶ reconcile ──▶ replace status
//!                    ▲                      │
//!                    └──── requeue/backoff ─┘
//! ```

#![doc = include_str!("../README.md")]
#![forbid(unsafe_code)]

pub mod config;
pub mod controller;
pub mod error;
pub mod provider;
pub mod queue;
pub mod reconciler;
pub mod retry;
pub mod store;

pub use config::ControllerConfig;
pub use controller::Controller;
pub use error::{ControlError, ControlResult};
pub use provider::{create_provider, BackingProvider, MemoryProvider, ProviderError};
pub use queue::WorkQueue;
pub use reconciler::{Action, LifecycleReconciler, Reconcile, UploadReconciler};
pub use retry::RetryPolicy;
pub use store::{MemoryStore, ResourceFilter, ResourceStore};
