//! Controller for the HyperConverged resource
//!
//! [`hyperconverged`] holds the reconcile loop, [`conditions`] folds operand
//! health into the HyperConverged conditions, and [`runner`] wires it all
//! into kube-runtime.

pub mod conditions;
mod hyperconverged;
mod runner;
pub mod schedule;

#[cfg(test)]
pub use hyperconverged::MockHyperConvergedClient;
pub use hyperconverged::{
    error_policy, reconcile, Clients, Context, HyperConvergedClient, KubeHyperConvergedClient,
    FINALIZER, OPERATOR_VERSION_NAME, RESYNC_INTERVAL,
};
pub use runner::run;
