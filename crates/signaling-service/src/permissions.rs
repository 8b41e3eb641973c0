//! Role to media permission mapping.

use crate::errors::SignalingError;

pub const ROLE_CAMERA: &str = "camera";
pub const ROLE_DIRECTOR: &str = "director";

/// Publish/subscribe rights derived from a role once per join.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PermissionGrant {
    pub can_publish: bool,
    pub can_subscribe: bool,
}

/// Resolve the grant for `role`.
///
/// Cameras only publish, directors only subscribe. Any other value is an
/// [`SignalingError::UnknownRole`].
pub fn permissions_for_role(role: &str) -> Result<PermissionGrant, SignalingError> {
    match role {
        ROLE_CAMERA => Ok(PermissionGrant {
            can_publish: true,
            can_subscribe: false,
        }),
        ROLE_DIRECTOR => Ok(PermissionGrant {
            can_publish: false,
            can_subscribe: true,
        }),
        other => Err(SignalingError::UnknownRole(other.to_string())),
    }
}
