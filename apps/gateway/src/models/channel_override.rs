use diesel::prelude::*;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::db::schema::channel_overrides;

/// Per-channel allow/deny masks for one role. `allow & deny` is always zero
/// for stored rows.
#[derive(Debug, Clone, PartialEq, Eq, Queryable, Selectable, Serialize, Deserialize, ToSchema)]
#[diesel(table_name = channel_overrides)]
pub struct ChannelOverride {
    pub channel_id: String,
    pub role_id: String,
    pub allow: i64,
    pub deny: i64,
}

#[derive(Debug, Insertable, AsChangeset)]
#[diesel(table_name = channel_overrides)]
pub struct NewChannelOverride<'a> {
    pub channel_id: &'a str,
    pub role_id: &'a str,
    pub allow: i64,
    pub deny: i64,
}

impl ChannelOverride {
    pub fn as_new(&self) -> NewChannelOverride<'_> {
        NewChannelOverride {
            channel_id: &self.channel_id,
            role_id: &self.role_id,
            allow: self.allow,
            deny: self.deny,
        }
    }

    /// An all-zero override carries no information and means "inherit".
    pub fn is_empty(&self) -> bool {
        self.allow == 0 && self.deny == 0
    }
}
