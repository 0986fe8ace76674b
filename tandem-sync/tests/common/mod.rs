#![allow(dead_code)]

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tandem_sync::gateway::memory::{MemoryLocalStore, MemoryRemoteStore};
use tandem_sync::{Mapper, SyncConfig, SyncHandler, SyncManager};
use tandem_types::{Record, RecordId, Timestamp};

/// Remote-facing model.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: String,
    pub name: String,
    pub created_at: u64,
    pub last_updated: u64,
}

impl Record for User {
    fn id(&self) -> RecordId {
        RecordId::from(self.id.as_str())
    }

    fn created_at(&self) -> Timestamp {
        Timestamp::from_millis(self.created_at)
    }

    fn last_updated(&self) -> Timestamp {
        Timestamp::from_millis(self.last_updated)
    }
}

/// Local-storage entity with different field names.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserEntity {
    pub user_id: String,
    pub display_name: String,
    pub created: u64,
    pub modified: u64,
}

impl Record for UserEntity {
    fn id(&self) -> RecordId {
        RecordId::from(self.user_id.as_str())
    }

    fn created_at(&self) -> Timestamp {
        Timestamp::from_millis(self.created)
    }

    fn last_updated(&self) -> Timestamp {
        Timestamp::from_millis(self.modified)
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct UserMapper;

impl Mapper for UserMapper {
    type Model = User;
    type Entity = UserEntity;

    fn to_entity(&self, model: &User) -> UserEntity {
        UserEntity {
            user_id: model.id.clone(),
            display_name: model.name.clone(),
            created: model.created_at,
            modified: model.last_updated,
        }
    }

    fn to_model(&self, entity: &UserEntity) -> User {
        User {
            id: entity.user_id.clone(),
            name: entity.display_name.clone(),
            created_at: entity.created,
            last_updated: entity.modified,
        }
    }
}

pub type Remote = MemoryRemoteStore<User>;
pub type Local = MemoryLocalStore<UserEntity>;
pub type Handler = SyncHandler<UserMapper, Remote, Local>;
pub type Manager = SyncManager<UserMapper, Remote, Local>;

pub fn user(id: &str, last_updated: u64) -> User {
    User {
        id: id.to_string(),
        name: format!("user {id} @{last_updated}"),
        created_at: 0,
        last_updated,
    }
}

pub fn entity(id: &str, last_updated: u64) -> UserEntity {
    UserMapper.to_entity(&user(id, last_updated))
}

pub fn stores() -> (Arc<Remote>, Arc<Local>) {
    (Arc::new(Remote::new()), Arc::new(Local::new()))
}

pub fn handler(remote: &Arc<Remote>, local: &Arc<Local>) -> Handler {
    SyncHandler::new(remote.clone(), local.clone(), UserMapper)
}

/// Millisecond backoff so retry paths finish quickly.
pub fn fast_config() -> SyncConfig {
    SyncConfig {
        call_timeout_ms: 1_000,
        max_attempts: 3,
        base_backoff_ms: 1,
        max_backoff_ms: 5,
        event_capacity: 1024,
    }
}

pub fn manager(remote: &Arc<Remote>, local: &Arc<Local>, config: SyncConfig) -> Manager {
    SyncManager::new(remote.clone(), local.clone(), UserMapper, config).unwrap()
}

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}
