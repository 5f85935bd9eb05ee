//! Role registry: named capability profiles for child agents.
//!
//! [`RoleRegistry`] is the single source of truth for which roles exist and
//! what each one is allowed to do. Profiles arrive pre-parsed (the TOML
//! config is one loader; any serde front end works) -- this module never
//! parses role-definition source files itself.
//!
//! The registry wraps a `HashMap` behind `Arc<Mutex<..>>` so the dispatcher,
//! pipeline, and host shell can share one instance. The role catalog can
//! change between turns, so strategies read it fresh on every use rather
//! than caching its contents.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use serde::Deserialize;

use crate::error::RegistryError;

/// A named capability profile defining one kind of child agent.
///
/// Immutable once registered; the registry hands out clones.
#[derive(Clone, Debug, Deserialize)]
pub struct RoleProfile {
    /// Role name, the key used by `delegate` and pipeline steps.
    pub name: String,
    /// One-line human description, surfaced in role listings and prompts.
    pub description: String,
    /// Tool ids the child process may use. Order is preserved on the
    /// child's command line.
    #[serde(default)]
    pub tools: Vec<String>,
    /// Instruction text injected into the child.
    pub instructions: String,
    /// When true, `instructions` fully replaces the child's default
    /// instruction set instead of being appended to it.
    #[serde(default)]
    pub replace_prompt: bool,
}

/// Shared registry of role profiles.
///
/// Cheap to clone; all clones see the same underlying catalog.
#[derive(Clone, Default)]
pub struct RoleRegistry {
    inner: Arc<Mutex<Inner>>,
}

#[derive(Default)]
struct Inner {
    profiles: HashMap<String, RoleProfile>,
    /// Registration order, so `list` and prompt text are stable.
    order: Vec<String>,
}

impl RoleRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a registry from an iterator of profiles, e.g. config contents.
    pub fn from_profiles(
        profiles: impl IntoIterator<Item = RoleProfile>,
    ) -> Result<Self, RegistryError> {
        let registry = Self::new();
        for profile in profiles {
            registry.register(profile)?;
        }
        Ok(registry)
    }

    /// Register a profile. Fails if a profile with the same name exists.
    pub fn register(&self, profile: RoleProfile) -> Result<(), RegistryError> {
        let mut inner = self.inner.lock().unwrap();
        if inner.profiles.contains_key(&profile.name) {
            return Err(RegistryError::DuplicateRole {
                name: profile.name.clone(),
            });
        }
        inner.order.push(profile.name.clone());
        inner.profiles.insert(profile.name.clone(), profile);
        Ok(())
    }

    /// Look up a profile by name.
    pub fn lookup(&self, name: &str) -> Result<RoleProfile, RegistryError> {
        let inner = self.inner.lock().unwrap();
        inner
            .profiles
            .get(name)
            .cloned()
            .ok_or_else(|| RegistryError::RoleNotFound {
                name: name.to_string(),
                available: inner.order.clone(),
            })
    }

    /// Return all profiles in registration order.
    pub fn list(&self) -> Vec<RoleProfile> {
        let inner = self.inner.lock().unwrap();
        inner
            .order
            .iter()
            .filter_map(|name| inner.profiles.get(name).cloned())
            .collect()
    }

    /// Return registered role names in registration order.
    pub fn names(&self) -> Vec<String> {
        self.inner.lock().unwrap().order.clone()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().unwrap().profiles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
