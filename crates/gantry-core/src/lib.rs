//! Gantry Core - draft lifecycle and the etcd control loop
//!
//! Operators stage edits as draft rows, preview them with the [`diff`]
//! engine, push them to etcd through the [`publish`] pipeline, and undo
//! unpublished edits with the [`revert`] engine. The [`reconcile`] module
//! keeps a snapshot of what etcd actually holds, driven by the [`scheduler`].
//! Every mutation is gated by the [`status`] state machine.

pub mod adopt;
pub mod audit;
pub mod context;
pub mod diff;
pub mod document;
pub mod draft;
pub mod import;
pub mod publish;
pub mod reconcile;
pub mod registry;
pub mod revert;
pub mod scheduler;
pub mod service;
pub mod status;

#[cfg(test)]
pub(crate) mod testing;

pub use context::GatewayContext;
pub use diff::{DiffRequest, ResourceChangeDetail, ResourceChangeInfo, ResourceDiffDetail};
pub use document::ResourceDocument;
pub use import::{ImportReport, ImportResource};
pub use publish::PublishReport;
pub use reconcile::SyncOutcome;
pub use scheduler::{ReconcileLoop, ResyncHandle, ResyncWorker, SyncSettings};
pub use service::{ControlPlane, GatewayRuntime, GatewayScope};
pub use status::StatusMachine;
