//! Model/entity mapping.
//!
//! A [`Mapper`] is a stateless value passed to the handler at construction.
//! It converts between the remote-facing model and the local-facing entity
//! and exposes the identity and timestamp accessors the handler needs, so
//! the handler never depends on concrete field names.

use tandem_types::{Record, RecordId, Timestamp};

/// Bidirectional conversion between a model and its entity.
pub trait Mapper: Send + Sync + 'static {
    /// Remote-facing representation.
    type Model: Record + Clone + Send + Sync + 'static;
    /// Local-storage representation.
    type Entity: Record + Clone + Send + Sync + 'static;

    /// Converts a remote model into a local entity.
    fn to_entity(&self, model: &Self::Model) -> Self::Entity;

    /// Converts a local entity into a remote model.
    fn to_model(&self, entity: &Self::Entity) -> Self::Model;

    /// Identity of a model.
    fn id(&self, model: &Self::Model) -> RecordId {
        model.id()
    }

    /// Last-modified time of a model.
    fn last_updated(&self, model: &Self::Model) -> Timestamp {
        model.last_updated()
    }
}

/// Mapper for applications that use one type on both sides.
#[derive(Debug)]
pub struct IdentityMapper<T>(std::marker::PhantomData<fn() -> T>);

impl<T> IdentityMapper<T> {
    pub fn new() -> Self {
        Self(std::marker::PhantomData)
    }
}

impl<T> Default for IdentityMapper<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Clone for IdentityMapper<T> {
    fn clone(&self) -> Self {
        Self::new()
    }
}

impl<T: Record + Clone + Send + Sync + 'static> Mapper for IdentityMapper<T> {
    type Model = T;
    type Entity = T;

    fn to_entity(&self, model: &T) -> T {
        model.clone()
    }

    fn to_model(&self, entity: &T) -> T {
        entity.clone()
    }
}
