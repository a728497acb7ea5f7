//! Manifest-level orchestration.
//!
//! A [`Workspace`] walks a [`Manifest`] resource by resource, resolves the
//! schema and transport for each kind, runs the [`Reconciler`] and keeps the
//! [`StateStore`] in step with what was applied. Resources are handled one
//! at a time, in manifest order, stopping at the first failure.

use crate::database::{ResourceRecord, StateError, StateStore};
use crate::error::ReconcileError;
use crate::manifest::{Manifest, ManifestError, ResourceDecl};
use crate::reconcile::{ApplyOutcome, Reconciler, ReconciliationPlan, RetryPolicy};
use crate::schema::{ResourceSchema, SchemaRegistry};
use crate::transport::Transport;
use tracing::{info, warn};

#[derive(Debug, thiserror::Error)]
pub enum WorkspaceError {
    #[error(transparent)]
    Manifest(#[from] ManifestError),

    #[error("State store error: {0}")]
    State(#[from] StateError),

    #[error("{address}: {source}")]
    Reconcile {
        address: String,
        #[source]
        source: ReconcileError,
    },

    #[error("Unknown resource kind '{0}'")]
    UnknownKind(String),

    #[error("No transport available for resource kind '{0}'")]
    NoTransport(String),

    #[error(
        "Resource '{address}' is recorded as {recorded} but declared as {declared}; destroy it first"
    )]
    KindChanged {
        address: String,
        recorded: String,
        declared: String,
    },
}

/// Applies manifests against one state store.
pub struct Workspace {
    registry: SchemaRegistry,
    store: StateStore,
    retry: RetryPolicy,
}

impl Workspace {
    pub fn new(registry: SchemaRegistry, store: StateStore, retry: RetryPolicy) -> Self {
        Self {
            registry,
            store,
            retry,
        }
    }

    pub fn registry(&self) -> &SchemaRegistry {
        &self.registry
    }

    pub fn store(&self) -> &StateStore {
        &self.store
    }

    fn schema(&self, kind: &str) -> Result<&ResourceSchema, WorkspaceError> {
        self.registry
            .get(kind)
            .ok_or_else(|| WorkspaceError::UnknownKind(kind.to_string()))
    }

    fn reconciler(&self, kind: &str) -> Result<Reconciler<'_>, WorkspaceError> {
        Ok(Reconciler::new(self.schema(kind)?, self.retry))
    }

    /// The stored record for `decl`, rejecting a kind change.
    fn recorded(&self, decl: &ResourceDecl) -> Result<Option<ResourceRecord>, WorkspaceError> {
        match self.store.load(&decl.address)? {
            Some(record) if record.kind != decl.kind => Err(WorkspaceError::KindChanged {
                address: decl.address.clone(),
                recorded: record.kind,
                declared: decl.kind.clone(),
            }),
            other => Ok(other),
        }
    }

    /// Reads the remote state of `decl` and plans it without writing.
    pub async fn plan_resource<T>(
        &self,
        decl: &ResourceDecl,
        transport: &T,
    ) -> Result<ReconciliationPlan, WorkspaceError>
    where
        T: Transport + ?Sized,
    {
        let reconciler = self.reconciler(&decl.kind)?;
        let wrap = |source| WorkspaceError::Reconcile {
            address: decl.address.clone(),
            source,
        };

        reconciler
            .schema()
            .resolve_desired(&decl.fields)
            .map_err(wrap)?;
        let remote = match self.recorded(decl)? {
            Some(record) => reconciler
                .read(&record.remote_id, transport)
                .await
                .map_err(wrap)?,
            None => None,
        };
        reconciler.plan(&decl.fields, remote.as_ref()).map_err(wrap)
    }

    /// Reconciles `decl` and records the result.
    pub async fn apply_resource<T>(
        &self,
        decl: &ResourceDecl,
        transport: &T,
    ) -> Result<ApplyOutcome, WorkspaceError>
    where
        T: Transport + ?Sized,
    {
        let reconciler = self.reconciler(&decl.kind)?;
        let record = self.recorded(decl)?;
        let known_id = record.as_ref().map(|r| r.remote_id.as_str());

        let outcome = reconciler
            .reconcile(known_id, &decl.fields, transport)
            .await
            .map_err(|source| {
                if source.is_partial_replacement() {
                    warn!(
                        "{} was deleted but not recreated; the next apply will create it",
                        decl.address
                    );
                }
                WorkspaceError::Reconcile {
                    address: decl.address.clone(),
                    source,
                }
            })?;

        let remote_id = match (outcome.new_id(), known_id) {
            (Some(id), _) | (None, Some(id)) => id.to_string(),
            (None, None) => return Ok(outcome),
        };
        self.store.save(&ResourceRecord {
            address: decl.address.clone(),
            kind: decl.kind.clone(),
            remote_id,
            fields: decl.fields.clone(),
        })?;
        Ok(outcome)
    }

    /// Deletes a recorded resource and forgets it.
    pub async fn destroy_resource<T>(
        &self,
        record: &ResourceRecord,
        transport: &T,
    ) -> Result<(), WorkspaceError>
    where
        T: Transport + ?Sized,
    {
        self.reconciler(&record.kind)?
            .destroy(&record.remote_id, transport)
            .await
            .map_err(|source| WorkspaceError::Reconcile {
                address: record.address.clone(),
                source,
            })?;
        self.store.remove(&record.address)?;
        Ok(())
    }

    /// Plans every resource of `manifest`.
    pub async fn plan_all<'t, T, F>(
        &self,
        manifest: &Manifest,
        transports: F,
    ) -> Result<Vec<(String, ReconciliationPlan)>, WorkspaceError>
    where
        T: Transport + ?Sized + 't,
        F: Fn(&str) -> Option<&'t T>,
    {
        manifest.validate(&self.registry)?;
        let mut plans = Vec::with_capacity(manifest.resources.len());
        for decl in &manifest.resources {
            let transport = resolve(&transports, &decl.kind)?;
            let plan = self.plan_resource(decl, transport).await?;
            info!("{}: {}", decl.address, plan.summary());
            plans.push((decl.address.clone(), plan));
        }
        Ok(plans)
    }

    /// Applies every resource of `manifest` in order, stopping at the first
    /// error. Resources applied before the failure stay recorded.
    pub async fn apply_all<'t, T, F>(
        &self,
        manifest: &Manifest,
        transports: F,
    ) -> Result<Vec<(String, ApplyOutcome)>, WorkspaceError>
    where
        T: Transport + ?Sized + 't,
        F: Fn(&str) -> Option<&'t T>,
    {
        manifest.validate(&self.registry)?;
        let mut outcomes = Vec::with_capacity(manifest.resources.len());
        for decl in &manifest.resources {
            let transport = resolve(&transports, &decl.kind)?;
            let outcome = self.apply_resource(decl, transport).await?;
            info!("{}: {:?}", decl.address, outcome);
            outcomes.push((decl.address.clone(), outcome));
        }
        Ok(outcomes)
    }

    /// Destroys the recorded resources of `manifest` in reverse order.
    /// Returns the addresses destroyed.
    pub async fn destroy_all<'t, T, F>(
        &self,
        manifest: &Manifest,
        transports: F,
    ) -> Result<Vec<String>, WorkspaceError>
    where
        T: Transport + ?Sized + 't,
        F: Fn(&str) -> Option<&'t T>,
    {
        manifest.validate(&self.registry)?;
        let mut destroyed = Vec::new();
        for decl in manifest.resources.iter().rev() {
            let Some(record) = self.store.load(&decl.address)? else {
                info!("{}: not recorded, skipping", decl.address);
                continue;
            };
            let transport = resolve(&transports, &record.kind)?;
            self.destroy_resource(&record, transport).await?;
            destroyed.push(record.address);
        }
        Ok(destroyed)
    }
}

fn resolve<'t, T, F>(transports: &F, kind: &str) -> Result<&'t T, WorkspaceError>
where
    T: ?Sized + 't,
    F: Fn(&str) -> Option<&'t T>,
{
    transports(kind).ok_or_else(|| WorkspaceError::NoTransport(kind.to_string()))
}
