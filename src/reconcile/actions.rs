//! Actions produced by [`plan`](super::plan).

use crate::schema::FieldMap;

/// One step needed to converge a remote resource on its desired state.
#[derive(Debug, Clone, PartialEq)]
pub enum Action {
    /// Remote already matches.
    NoOp,

    /// The resource does not exist remotely yet.
    Create {
        /// Full desired state, defaults filled in.
        desired: FieldMap,
    },

    /// Apply mutable changes in place.
    Update {
        /// Fields whose value differs from remote.
        changed: FieldMap,
        /// Unchanged fields the API wants on every write.
        accompanying: FieldMap,
    },

    /// Delete and recreate.
    Replace {
        /// Name of the field that forced the replacement.
        reason: String,
        /// Full desired state used for the recreate.
        desired: FieldMap,
    },
}

impl Action {
    pub fn is_noop(&self) -> bool {
        matches!(self, Self::NoOp)
    }

    pub fn is_destructive(&self) -> bool {
        matches!(self, Self::Replace { .. })
    }
}

/// Ordered list of actions for one resource.
#[derive(Debug, Clone, PartialEq)]
pub struct ReconciliationPlan {
    actions: Vec<Action>,
}

impl ReconciliationPlan {
    pub(crate) fn single(action: Action) -> Self {
        Self {
            actions: vec![action],
        }
    }

    pub fn noop() -> Self {
        Self::single(Action::NoOp)
    }

    pub fn actions(&self) -> &[Action] {
        &self.actions
    }

    pub fn is_noop(&self) -> bool {
        self.actions.iter().all(Action::is_noop)
    }

    /// Names of the fields an `Update` would change, sorted.
    pub fn changed_fields(&self) -> Vec<&str> {
        self.actions
            .iter()
            .filter_map(|a| match a {
                Action::Update { changed, .. } => Some(changed.names()),
                _ => None,
            })
            .flatten()
            .collect()
    }

    /// The field that forced a replacement, if any.
    pub fn replacement_reason(&self) -> Option<&str> {
        self.actions.iter().find_map(|a| match a {
            Action::Replace { reason, .. } => Some(reason.as_str()),
            _ => None,
        })
    }

    /// Short one-line description for logs.
    pub fn summary(&self) -> String {
        let parts: Vec<String> = self
            .actions
            .iter()
            .map(|a| match a {
                Action::NoOp => "no changes".to_string(),
                Action::Create { .. } => "create".to_string(),
                Action::Update { changed, .. } => format!(
                    "update in place ({})",
                    changed.names().collect::<Vec<_>>().join(", ")
                ),
                Action::Replace { reason, .. } => format!("replace (forced by '{}')", reason),
            })
            .collect();
        parts.join("; ")
    }
}

impl IntoIterator for ReconciliationPlan {
    type Item = Action;
    type IntoIter = std::vec::IntoIter<Action>;

    fn into_iter(self) -> Self::IntoIter {
        self.actions.into_iter()
    }
}
