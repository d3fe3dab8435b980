//! Forgeplane engine: the generic managed-resource control loop.
//!
//! Adapters implement [`ExternalResource`] for one kind; [`reconcile`] drives any of them
//! through observe, decide, act and report. [`Manager`] wires adapters into kube-runtime
//! controllers.

#![forbid(unsafe_code)]

pub mod adapter;
pub mod backoff;
pub mod dispatch;
pub mod error;
pub mod reconcile;
pub mod settings;

pub use adapter::{found, AdapterError, ExternalResource, ManagedResource, Observation};
pub use backoff::BackoffTracker;
pub use dispatch::{shutdown_signal, Manager, CONTROLLER_NAME};
pub use error::{ReconcileError, Retry};
pub use reconcile::{reconcile, Binding, Requeue};
pub use settings::Settings;
