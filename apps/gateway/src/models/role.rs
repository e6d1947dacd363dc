use diesel::prelude::*;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::db::schema::roles;

/// A server-scoped role. `position` orders override application; higher
/// positions are applied later and win.
#[derive(Debug, Clone, PartialEq, Eq, Queryable, Selectable, Insertable, Serialize, Deserialize, ToSchema)]
#[diesel(table_name = roles)]
pub struct Role {
    pub id: String,
    pub server_id: String,
    pub name: String,
    pub position: i32,
    pub permissions: i64,
    /// Held implicitly by every member of the server.
    pub is_default: bool,
}
