//! Actors and the identity directory the permission engine reads them from.

use crate::error::Result;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Someone (or something) performing actions: a dispatcher, a field agent,
/// a customer, a service account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Actor {
    pub id: String,
    /// Assigned role names, in no particular order.
    pub roles: Vec<String>,
    pub organization_id: Option<String>,
}

impl Actor {
    /// Create an actor with the given roles.
    pub fn new<I, S>(id: impl Into<String>, roles: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            id: id.into(),
            roles: roles.into_iter().map(Into::into).collect(),
            organization_id: None,
        }
    }

    /// Set the actor's organization.
    pub fn with_organization(mut self, organization_id: impl Into<String>) -> Self {
        self.organization_id = Some(organization_id.into());
        self
    }

    pub fn has_role(&self, role: &str) -> bool {
        self.roles.iter().any(|r| r == role)
    }
}

/// Lookup of actors by id. Owned by the identity/storage layer; the guard
/// core only reads from it.
pub trait ActorDirectory: Send + Sync {
    /// `Ok(None)` when the actor does not exist.
    fn get_actor(&self, id: &str) -> Result<Option<Actor>>;
}

impl<T: ActorDirectory + ?Sized> ActorDirectory for Arc<T> {
    fn get_actor(&self, id: &str) -> Result<Option<Actor>> {
        (**self).get_actor(id)
    }
}

/// In-memory directory using DashMap for thread safety.
#[derive(Debug, Default, Clone)]
pub struct MemoryActorDirectory {
    actors: Arc<DashMap<String, Actor>>,
}

impl MemoryActorDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace an actor.
    pub fn upsert(&self, actor: Actor) {
        self.actors.insert(actor.id.clone(), actor);
    }

    /// Remove an actor; returns whether it existed.
    pub fn remove(&self, id: &str) -> bool {
        self.actors.remove(id).is_some()
    }

    pub fn len(&self) -> usize {
        self.actors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.actors.is_empty()
    }
}

impl ActorDirectory for MemoryActorDirectory {
    fn get_actor(&self, id: &str) -> Result<Option<Actor>> {
        Ok(self.actors.get(id).map(|actor| actor.clone()))
    }
}

impl FromIterator<Actor> for MemoryActorDirectory {
    fn from_iter<T: IntoIterator<Item = Actor>>(iter: T) -> Self {
        let directory = Self::new();
        for actor in iter {
            directory.upsert(actor);
        }
        directory
    }
}
