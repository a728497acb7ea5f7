//! The seam between the reconciler and a concrete API.

use crate::schema::FieldMap;
use async_trait::async_trait;

/// Capability set the reconciler drives.
///
/// Implementations own everything about the wire: endpoints, auth, payload
/// shape. The reconciler only sees [`FieldMap`]s and opaque resource ids.
#[async_trait]
pub trait Transport: Send + Sync {
    type Error: std::error::Error + Send + Sync + 'static;

    /// Reads the current state of `id`. `Ok(None)` means the resource does
    /// not exist.
    async fn read(&self, id: &str) -> Result<Option<FieldMap>, Self::Error>;

    /// Writes an in-place update built by [`Transport::build_update_payload`].
    ///
    /// Returns the new id when the update moved the resource, `None` when it
    /// still lives under `id`.
    async fn write(&self, id: &str, payload: &FieldMap) -> Result<Option<String>, Self::Error>;

    /// Deletes `id`. Deleting a resource that is already gone succeeds.
    async fn delete(&self, id: &str) -> Result<(), Self::Error>;

    /// Creates a resource from its full desired state, returning its id.
    async fn create(&self, desired: &FieldMap) -> Result<String, Self::Error>;

    /// Whether a failed call may succeed if repeated unchanged.
    fn is_retryable(&self, error: &Self::Error) -> bool;

    /// Shapes the body of an update. The default sends the changed fields
    /// plus those the schema marks as always required.
    fn build_update_payload(&self, changed: &FieldMap, accompanying: &FieldMap) -> FieldMap {
        let mut payload = accompanying.clone();
        payload.extend_from(changed);
        payload
    }
}
