//! Execution of reconciliation plans.

use super::{plan, Action, ReconciliationPlan};
use crate::error::{ActionKind, BoxError, ReconcileError, ReplaceStep};
use crate::schema::{FieldMap, ResourceSchema};
use crate::transport::Transport;
use std::future::Future;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Bounded retry with linear backoff for transient transport failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts per call, first one included.
    pub max_attempts: u32,
    /// Delay after the first failure; the n-th retry waits `n * backoff`.
    pub backoff: Duration,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, backoff: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            backoff,
        }
    }

    /// A single attempt, no retry.
    pub fn none() -> Self {
        Self::new(1, Duration::ZERO)
    }

    fn delay_after(&self, attempt: u32) -> Duration {
        self.backoff.saturating_mul(attempt)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(5, Duration::from_millis(500))
    }
}

/// What [`Reconciler::apply`] did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApplyOutcome {
    Unchanged,
    Created { id: String },
    /// `moved_to` is set when the update moved the resource to a new id.
    Updated {
        fields: Vec<String>,
        moved_to: Option<String>,
    },
    Replaced { previous: String, id: String },
}

impl ApplyOutcome {
    /// The id the resource lives under after a create, a replace or a move.
    pub fn new_id(&self) -> Option<&str> {
        match self {
            ApplyOutcome::Created { id } | ApplyOutcome::Replaced { id, .. } => Some(id),
            ApplyOutcome::Updated { moved_to, .. } => moved_to.as_deref(),
            ApplyOutcome::Unchanged => None,
        }
    }
}

/// Last failure of a retried call.
struct Exhausted<E> {
    attempts: u32,
    error: E,
}

impl<E: std::error::Error + Send + Sync + 'static> Exhausted<E> {
    fn boxed(self) -> (u32, BoxError) {
        (self.attempts, Box::new(self.error))
    }
}

/// Drives plans for one resource kind through a transport.
///
/// Holds no state between calls: every [`Reconciler::reconcile`] re-reads
/// the remote resource before planning.
#[derive(Debug, Clone)]
pub struct Reconciler<'a> {
    schema: &'a ResourceSchema,
    retry: RetryPolicy,
}

impl<'a> Reconciler<'a> {
    pub fn new(schema: &'a ResourceSchema, retry: RetryPolicy) -> Self {
        Self { schema, retry }
    }

    pub fn schema(&self) -> &ResourceSchema {
        self.schema
    }

    pub fn plan(
        &self,
        desired: &FieldMap,
        remote: Option<&FieldMap>,
    ) -> Result<ReconciliationPlan, ReconcileError> {
        plan(desired, remote, self.schema)
    }

    /// Reads the remote state of `id`, retrying transient failures.
    pub async fn read<T>(&self, id: &str, transport: &T) -> Result<Option<FieldMap>, ReconcileError>
    where
        T: Transport + ?Sized,
    {
        self.with_retry(transport, "read", || transport.read(id))
            .await
            .map_err(|e| {
                let (attempts, source) = e.boxed();
                ReconcileError::Read { attempts, source }
            })
    }

    /// Reads, plans and applies in one go.
    ///
    /// `id` is the last known remote id, `None` if the resource was never
    /// created. The desired state is checked before anything is read, so an
    /// invalid declaration fails without touching the remote.
    pub async fn reconcile<T>(
        &self,
        id: Option<&str>,
        desired: &FieldMap,
        transport: &T,
    ) -> Result<ApplyOutcome, ReconcileError>
    where
        T: Transport + ?Sized,
    {
        self.schema.resolve_desired(desired)?;
        let remote = match id {
            Some(id) => self.read(id, transport).await?,
            None => None,
        };
        if remote.is_none() {
            if let Some(id) = id {
                warn!("{} '{}' not found remotely, it will be recreated", self.schema.kind(), id);
            }
        }
        let plan = self.plan(desired, remote.as_ref())?;
        info!(
            "{} {}: {}",
            self.schema.kind(),
            id.unwrap_or("<new>"),
            plan.summary()
        );
        self.apply(&plan, id, transport).await
    }

    /// Executes a plan.
    ///
    /// `Replace` deletes before it creates. If the create then fails the
    /// error is a [`ReconcileError::Replacement`] tagged
    /// [`ReplaceStep::Create`] and the resource is gone until the next
    /// reconciliation recreates it.
    pub async fn apply<T>(
        &self,
        plan: &ReconciliationPlan,
        id: Option<&str>,
        transport: &T,
    ) -> Result<ApplyOutcome, ReconcileError>
    where
        T: Transport + ?Sized,
    {
        let mut outcome = ApplyOutcome::Unchanged;
        for action in plan.actions() {
            outcome = match action {
                Action::NoOp => ApplyOutcome::Unchanged,
                Action::Create { desired } => {
                    let new_id = self
                        .with_retry(transport, "create", || transport.create(desired))
                        .await
                        .map_err(|e| apply_error(ActionKind::Create, e))?;
                    info!("Created {} '{}'", self.schema.kind(), new_id);
                    ApplyOutcome::Created { id: new_id }
                }
                Action::Update {
                    changed,
                    accompanying,
                } => {
                    let id = id.ok_or(ReconcileError::MissingId {
                        action: ActionKind::Update,
                    })?;
                    let payload = transport.build_update_payload(changed, accompanying);
                    let moved_to = self
                        .with_retry(transport, "update", || transport.write(id, &payload))
                        .await
                        .map_err(|e| apply_error(ActionKind::Update, e))?;
                    match &moved_to {
                        Some(new_id) => {
                            info!("Moved {} '{}' to '{}'", self.schema.kind(), id, new_id)
                        }
                        None => info!("Updated {} '{}' in place", self.schema.kind(), id),
                    }
                    ApplyOutcome::Updated {
                        fields: changed.names().map(str::to_string).collect(),
                        moved_to,
                    }
                }
                Action::Replace { reason, desired } => {
                    let id = id.ok_or(ReconcileError::MissingId {
                        action: ActionKind::Delete,
                    })?;
                    warn!(
                        "Replacing {} '{}': field '{}' cannot change in place",
                        self.schema.kind(),
                        id,
                        reason
                    );
                    self.with_retry(transport, "delete", || transport.delete(id))
                        .await
                        .map_err(|e| replacement_error(ReplaceStep::Delete, e))?;
                    let new_id = self
                        .with_retry(transport, "create", || transport.create(desired))
                        .await
                        .map_err(|e| replacement_error(ReplaceStep::Create, e))?;
                    info!("Replaced {} '{}' with '{}'", self.schema.kind(), id, new_id);
                    ApplyOutcome::Replaced {
                        previous: id.to_string(),
                        id: new_id,
                    }
                }
            };
        }
        Ok(outcome)
    }

    /// Deletes `id`.
    pub async fn destroy<T>(&self, id: &str, transport: &T) -> Result<(), ReconcileError>
    where
        T: Transport + ?Sized,
    {
        self.with_retry(transport, "delete", || transport.delete(id))
            .await
            .map_err(|e| apply_error(ActionKind::Delete, e))?;
        info!("Destroyed {} '{}'", self.schema.kind(), id);
        Ok(())
    }

    async fn with_retry<T, R, F, Fut>(
        &self,
        transport: &T,
        what: &str,
        mut call: F,
    ) -> Result<R, Exhausted<T::Error>>
    where
        T: Transport + ?Sized,
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<R, T::Error>>,
    {
        let mut attempt = 0;
        loop {
            attempt += 1;
            match call().await {
                Ok(value) => return Ok(value),
                Err(error) if attempt < self.retry.max_attempts && transport.is_retryable(&error) => {
                    let delay = self.retry.delay_after(attempt);
                    warn!(
                        "{} {} attempt {}/{} failed: {}; retrying in {:?}",
                        self.schema.kind(),
                        what,
                        attempt,
                        self.retry.max_attempts,
                        error,
                        delay
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(error) => {
                    debug!(
                        "{} {} gave up after {} attempt(s)",
                        self.schema.kind(),
                        what,
                        attempt
                    );
                    return Err(Exhausted {
                        attempts: attempt,
                        error,
                    });
                }
            }
        }
    }
}

fn apply_error<E>(action: ActionKind, failure: Exhausted<E>) -> ReconcileError
where
    E: std::error::Error + Send + Sync + 'static,
{
    let (attempts, source) = failure.boxed();
    ReconcileError::Apply {
        action,
        attempts,
        source,
    }
}

fn replacement_error<E>(step: ReplaceStep, failure: Exhausted<E>) -> ReconcileError
where
    E: std::error::Error + Send + Sync + 'static,
{
    let (attempts, source) = failure.boxed();
    ReconcileError::Replacement {
        step,
        attempts,
        source,
    }
}
