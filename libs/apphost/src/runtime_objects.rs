//! Type-safe registry of runtime objects exposed by modules.
//!
//! Design goals:
//! - A module exposes an implementation of a capability *interface type* (usually a trait
//!   object such as `dyn my_module::RestEndpoints`) once, after its own start completed.
//! - Consumers fetch by interface type without knowing which module provides it.
//! - Every capability has at most one provider; a second registration is rejected and the
//!   first provider stays in place.
//!
//! Implementation details:
//! - Key = `TypeKey`, built from `type_name::<T>()`, which works for `T = dyn Trait`.
//! - Value = `Arc<T>` stored as `Box<dyn Any + Send + Sync>` (downcast on read) plus the
//!   name of the owning module, so that all entries of a module can be dropped when it stops.
//! - Sync hot path: `get()` is non-async and only takes a read lock.

use parking_lot::RwLock;
use std::{any::Any, collections::HashMap, fmt, sync::Arc};

/// Stable capability identifier for trait objects; uses fully-qualified `type_name::<T>()`.
#[derive(Clone, Copy, Eq, PartialEq, Hash, PartialOrd, Ord)]
pub struct TypeKey(&'static str);

impl TypeKey {
    #[inline]
    #[must_use]
    pub fn of<T: ?Sized + 'static>() -> Self {
        TypeKey(std::any::type_name::<T>())
    }

    #[must_use]
    pub fn as_str(&self) -> &'static str {
        self.0
    }
}

impl fmt::Debug for TypeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.0)
    }
}

impl fmt::Display for TypeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.0)
    }
}

type Boxed = Box<dyn Any + Send + Sync>;

/// A runtime object handed over by a module, already erased to its capability key.
pub struct ExposedObject {
    key: TypeKey,
    object: Boxed,
}

impl ExposedObject {
    /// Wrap `object` as the provider of capability `T`.
    pub fn new<T>(object: Arc<T>) -> Self
    where
        T: ?Sized + Send + Sync + 'static,
    {
        Self {
            key: TypeKey::of::<T>(),
            object: Box::new(object),
        }
    }

    #[must_use]
    pub fn key(&self) -> TypeKey {
        self.key
    }
}

impl fmt::Debug for ExposedObject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExposedObject")
            .field("key", &self.key)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, thiserror::Error)]
pub enum RuntimeObjectsError {
    #[error("no module provides capability {type_key}")]
    NotFound { type_key: TypeKey },

    #[error("type mismatch in registry for capability {type_key}")]
    TypeMismatch { type_key: TypeKey },

    #[error(
        "capability {type_key} is already provided by module '{existing}', module '{rejected}' cannot register it"
    )]
    DuplicateCapability {
        type_key: TypeKey,
        existing: &'static str,
        rejected: &'static str,
    },
}

struct Entry {
    owner: &'static str,
    object: Boxed,
}

/// Process-scoped lookup from capability type to the module-provided object.
///
/// Writes only happen while modules start or stop, reads happen at any time.
pub struct RuntimeObjects {
    map: RwLock<HashMap<TypeKey, Entry>>,
}

impl RuntimeObjects {
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self {
            map: RwLock::new(HashMap::new()),
        }
    }
}

impl Default for RuntimeObjects {
    fn default() -> Self {
        Self::new()
    }
}

impl RuntimeObjects {
    /// Register `object` as the provider of capability `T` on behalf of `owner`.
    ///
    /// # Errors
    /// Returns `DuplicateCapability` if another provider is already registered for `T`.
    pub fn register<T>(&self, owner: &'static str, object: Arc<T>) -> Result<(), RuntimeObjectsError>
    where
        T: ?Sized + Send + Sync + 'static,
    {
        self.register_exposed(owner, ExposedObject::new::<T>(object))
    }

    /// Register an already type-erased object.
    ///
    /// # Errors
    /// Returns `DuplicateCapability` if another provider is already registered for the key.
    pub fn register_exposed(
        &self,
        owner: &'static str,
        exposed: ExposedObject,
    ) -> Result<(), RuntimeObjectsError> {
        let mut w = self.map.write();
        if let Some(existing) = w.get(&exposed.key) {
            return Err(RuntimeObjectsError::DuplicateCapability {
                type_key: exposed.key,
                existing: existing.owner,
                rejected: owner,
            });
        }
        w.insert(
            exposed.key,
            Entry {
                owner,
                object: exposed.object,
            },
        );
        Ok(())
    }

    /// Fetch the provider of capability `T`.
    ///
    /// # Errors
    /// Returns `NotFound` if no running module provides `T`. Callers treat that as
    /// "module not installed", not as a crash condition.
    pub fn get<T>(&self) -> Result<Arc<T>, RuntimeObjectsError>
    where
        T: ?Sized + Send + Sync + 'static,
    {
        let type_key = TypeKey::of::<T>();
        let r = self.map.read();
        let entry = r
            .get(&type_key)
            .ok_or(RuntimeObjectsError::NotFound { type_key })?;

        // Stored value is exactly `Arc<T>`; downcast is safe and cheap.
        entry
            .object
            .downcast_ref::<Arc<T>>()
            .cloned()
            .ok_or(RuntimeObjectsError::TypeMismatch { type_key })
    }

    /// Name of the module providing `key`, if any.
    #[must_use]
    pub fn provider_of(&self, key: TypeKey) -> Option<&'static str> {
        self.map.read().get(&key).map(|e| e.owner)
    }

    #[must_use]
    pub fn contains(&self, key: TypeKey) -> bool {
        self.map.read().contains_key(&key)
    }

    /// Drop every entry owned by `owner`; returns the removed keys.
    pub fn remove_owned_by(&self, owner: &str) -> Vec<TypeKey> {
        let mut w = self.map.write();
        let keys: Vec<TypeKey> = w
            .iter()
            .filter(|(_, e)| e.owner == owner)
            .map(|(k, _)| *k)
            .collect();
        for k in &keys {
            w.remove(k);
        }
        keys
    }

    pub fn len(&self) -> usize {
        self.map.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.read().is_empty()
    }
}
