//! Reconciliation of one remote resource against its desired state.
//!
//! Split in two halves:
//!
//! - [`plan`] is a pure function: desired state, remote state and schema
//!   in, a [`ReconciliationPlan`] out. No I/O, fully deterministic.
//! - [`Reconciler`] executes a plan through a [`Transport`](crate::Transport),
//!   retrying transient failures.
//!
//! A plan never contains both an `Update` and a `Replace`: as soon as one
//! field forces a replacement the comparison stops, since the recreate
//! carries the full desired state anyway.

mod actions;
mod apply;

pub use actions::{Action, ReconciliationPlan};
pub use apply::{ApplyOutcome, Reconciler, RetryPolicy};

use crate::error::ReconcileError;
use crate::schema::{FieldMap, Mutability, ResourceSchema};
use tracing::debug;

/// Computes the actions that bring `remote` in line with `desired`.
///
/// `remote` is `None` when the resource does not exist (never created, or
/// removed out of band); the plan is then a single `Create`.
///
/// # Errors
///
/// `UnknownField` if `desired` names a field the schema does not declare,
/// `Validation` if a value on either side has the wrong type or a desired
/// value fails its validator.
pub fn plan(
    desired: &FieldMap,
    remote: Option<&FieldMap>,
    schema: &ResourceSchema,
) -> Result<ReconciliationPlan, ReconcileError> {
    let desired = schema.resolve_desired(desired)?;
    let Some(remote) = remote else {
        return Ok(ReconciliationPlan::single(Action::Create { desired }));
    };
    let remote = schema.resolve_remote(remote)?;

    let mut changed = FieldMap::new();
    for spec in schema.fields() {
        if spec.mutability == Mutability::ComputedOnly {
            continue;
        }
        let Some(want) = desired.get(spec.name) else {
            continue;
        };
        // An attribute the API leaves out is taken to hold its default.
        let have = remote
            .get(spec.name)
            .cloned()
            .or_else(|| spec.default_value());
        if have.as_ref() == Some(want) {
            continue;
        }

        debug!(
            "{}: field '{}' drifted ({} -> {})",
            schema.kind(),
            spec.name,
            have.as_ref()
                .map_or_else(|| "unset".to_string(), ToString::to_string),
            want
        );

        let latch_released = spec.latch
            && have.as_ref().and_then(|v| v.as_bool()) == Some(true)
            && want.as_bool() == Some(false);
        if spec.mutability == Mutability::Immutable || latch_released {
            return Ok(ReconciliationPlan::single(Action::Replace {
                reason: spec.name.to_string(),
                desired,
            }));
        }

        changed.insert(spec.name, want.clone());
    }

    if changed.is_empty() {
        return Ok(ReconciliationPlan::noop());
    }

    let accompanying = schema
        .fields()
        .iter()
        .filter(|spec| spec.always_send && !changed.contains(spec.name))
        .filter_map(|spec| {
            desired
                .get(spec.name)
                .map(|v| (spec.name.to_string(), v.clone()))
        })
        .collect();

    Ok(ReconciliationPlan::single(Action::Update {
        changed,
        accompanying,
    }))
}
