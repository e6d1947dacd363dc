pub mod memory;
pub mod pg;
pub mod pool;
pub mod schema;
pub mod stores;

use std::sync::Arc;

use memory::MemoryStore;
use pg::PgStore;
use pool::DbPool;
use stores::{ChannelOverrideStore, ChannelStore, MembershipStore, RoleStore, UserStatusStore};

/// The collaborator stores, bundled for handlers and the composition root.
#[derive(Clone)]
pub struct Stores {
    pub users: Arc<dyn UserStatusStore>,
    pub roles: Arc<dyn RoleStore>,
    pub overrides: Arc<dyn ChannelOverrideStore>,
    pub channels: Arc<dyn ChannelStore>,
    pub memberships: Arc<dyn MembershipStore>,
}

impl Stores {
    pub fn memory(store: Arc<MemoryStore>) -> Self {
        Self {
            users: store.clone(),
            roles: store.clone(),
            overrides: store.clone(),
            channels: store.clone(),
            memberships: store,
        }
    }

    pub fn postgres(pool: DbPool) -> Self {
        let store = Arc::new(PgStore::new(pool));
        Self {
            users: store.clone(),
            roles: store.clone(),
            overrides: store.clone(),
            channels: store.clone(),
            memberships: store,
        }
    }
}
