//! Persistence Operator - reconciles PersistenceAction resources into CronJobs
//!
//! An [`informer::Informer`] mirrors every PersistenceAction into a local
//! [`informer::Store`] and pushes the key of each change onto a
//! [`workqueue::WorkQueue`]. Workers pull keys off the queue and hand them to
//! the [`reconciler::Reconciler`], which re-reads the cache and creates,
//! updates or deletes the action's CronJob. Failed keys are retried with
//! per-key exponential backoff.
//!
//! # Usage
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use persistence_operator::bootstrap::{self, BootstrapWait, KubeKindRegistry};
//! use persistence_operator::jobs::KubeJobs;
//! use persistence_operator::k8s_client::{get_k8s_client, PersistenceActions};
//! use persistence_operator::operator::{Operator, OperatorConfig};
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn example() -> persistence_operator::Result<()> {
//! let client = get_k8s_client(None, false).await?;
//! let cancel = CancellationToken::new();
//!
//! bootstrap::ensure_resource_kinds_registered(
//!     &KubeKindRegistry::new(client.clone()),
//!     &bootstrap::persistence_kinds(),
//!     BootstrapWait::default(),
//!     &cancel,
//! )
//! .await?;
//!
//! let operator = Operator::new(
//!     PersistenceActions::all(client.clone()),
//!     Arc::new(KubeJobs::new(client)),
//!     OperatorConfig::default(),
//! )?;
//! operator.run(cancel).await;
//! # Ok(())
//! # }
//! ```

pub mod bootstrap;
pub mod error;
pub mod informer;
pub mod jobs;
pub mod k8s_client;
pub mod names;
pub mod operator;
pub mod reconciler;
pub mod status;
pub mod workqueue;

pub use error::{Error, Result};
