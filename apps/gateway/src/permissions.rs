//! Permission bits and the channel permission resolver.
//!
//! Everything here is pure: callers load roles and overrides from their
//! stores and pass them in. See [`crate::access`] for the store-backed checks.

use std::fmt;

use crate::error::{ApiError, FieldError};
use crate::models::channel_override::ChannelOverride;
use crate::models::role::Role;

// ---------------------------------------------------------------------------
// Bits
// ---------------------------------------------------------------------------

pub const MANAGE_CHANNELS: i64 = 1 << 0;
pub const MANAGE_ROLES: i64 = 1 << 1;
pub const KICK_MEMBERS: i64 = 1 << 2;
pub const BAN_MEMBERS: i64 = 1 << 3;
pub const MANAGE_MESSAGES: i64 = 1 << 4;
pub const SEND_MESSAGES: i64 = 1 << 5;
pub const CONNECT_VOICE: i64 = 1 << 6;
pub const SPEAK: i64 = 1 << 7;
pub const STREAM: i64 = 1 << 8;
pub const ADMINISTRATOR: i64 = 1 << 9;
pub const MANAGE_INVITES: i64 = 1 << 10;
pub const READ_MESSAGES: i64 = 1 << 11;
pub const VIEW_CHANNEL: i64 = 1 << 12;

/// Every defined bit.
pub const ALL_PERMISSIONS: i64 = (1 << 13) - 1;

/// Bits a channel override is allowed to change. Server-management bits are
/// never channel-scoped.
pub const CHANNEL_OVERRIDABLE: i64 =
    SEND_MESSAGES | READ_MESSAGES | MANAGE_MESSAGES | CONNECT_VOICE | SPEAK | STREAM | VIEW_CHANNEL;

// ---------------------------------------------------------------------------
// Resolution
// ---------------------------------------------------------------------------

/// OR of every held role's bitmask, with the Administrator short-circuit.
pub fn server_permissions(roles: &[Role]) -> i64 {
    let base = roles.iter().fold(0i64, |acc, role| acc | role.permissions);
    if base & ADMINISTRATOR != 0 {
        ALL_PERMISSIONS
    } else {
        base
    }
}

/// Effective permissions of a user holding `roles` in a channel carrying
/// `overrides`.
///
/// Overrides for roles the user does not hold are ignored. The rest are
/// applied from lowest to highest role position, so the highest-positioned
/// role has the final say on any bit it mentions. Roles sharing a position
/// are ordered by ID.
pub fn resolve(roles: &[Role], overrides: &[ChannelOverride]) -> i64 {
    let base = server_permissions(roles);
    if base & ADMINISTRATOR != 0 {
        return ALL_PERMISSIONS;
    }

    let mut applicable: Vec<(&Role, &ChannelOverride)> = overrides
        .iter()
        .filter_map(|ov| {
            roles
                .iter()
                .find(|role| role.id == ov.role_id)
                .map(|role| (role, ov))
        })
        .collect();

    applicable.sort_by(|(a, _), (b, _)| {
        a.position.cmp(&b.position).then_with(|| a.id.cmp(&b.id))
    });

    applicable
        .into_iter()
        .fold(base, |perm, (_, ov)| apply_override(perm, ov.allow, ov.deny))
}

/// Applies one override. Bits outside [`CHANNEL_OVERRIDABLE`] pass through
/// untouched.
pub fn apply_override(perm: i64, allow: i64, deny: i64) -> i64 {
    let allow = allow & CHANNEL_OVERRIDABLE;
    let deny = deny & CHANNEL_OVERRIDABLE;
    (perm & !deny) | allow
}

/// True when `perm` grants every bit of `required`.
pub fn has(perm: i64, required: i64) -> bool {
    perm & ADMINISTRATOR != 0 || perm & required == required
}

// ---------------------------------------------------------------------------
// Override validation
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OverrideError {
    /// The same bits are both allowed and denied.
    Overlap(i64),
    /// Bits that cannot be set per channel.
    NotOverridable(i64),
}

impl fmt::Display for OverrideError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Overlap(bits) => write!(f, "bits {bits:#x} are both allowed and denied"),
            Self::NotOverridable(bits) => {
                write!(f, "bits {bits:#x} cannot be overridden per channel")
            }
        }
    }
}

impl std::error::Error for OverrideError {}

impl From<OverrideError> for ApiError {
    fn from(err: OverrideError) -> Self {
        let field = match err {
            OverrideError::Overlap(_) => "deny",
            OverrideError::NotOverridable(_) => "allow",
        };
        ApiError::validation(vec![FieldError {
            field: field.to_string(),
            message: err.to_string(),
        }])
    }
}

/// Rejects masks that would break the override invariants before they reach
/// storage.
pub fn validate_override(allow: i64, deny: i64) -> Result<(), OverrideError> {
    let overlap = allow & deny;
    if overlap != 0 {
        return Err(OverrideError::Overlap(overlap));
    }
    let foreign = (allow | deny) & !CHANNEL_OVERRIDABLE;
    if foreign != 0 {
        return Err(OverrideError::NotOverridable(foreign));
    }
    Ok(())
}
