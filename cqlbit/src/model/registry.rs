use crate::error::CqlError;
use crate::model::{Entity, EntityType};
use once_cell::sync::OnceCell;
use std::any::TypeId;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

/// Resolves one entity type against a registry; used for roots, user-defined types and registrations.
pub type EntityResolver = fn(&EntityRegistry) -> Result<Arc<EntityType>, CqlError>;

/// Metadata cache, one resolution per Rust type.
///
/// The map lock only guards slot creation; concurrent resolutions of the same type wait on the
/// slot's cell instead of resolving twice. A failed resolution leaves the slot empty so the error is
/// reported again to the next caller.
#[derive(Default)]
pub struct EntityRegistry {
    inner: Mutex<HashMap<TypeId, Arc<OnceCell<Arc<EntityType>>>>>,
}

impl EntityRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn slot(&self, key: TypeId) -> Result<Arc<OnceCell<Arc<EntityType>>>, CqlError> {
        let mut map = self.inner.lock()?;
        let slot = map.entry(key).or_insert_with(|| Arc::new(OnceCell::new())).clone();
        drop(map);
        Ok(slot)
    }

    pub fn resolve<T: Entity>(&self) -> Result<Arc<EntityType>, CqlError> {
        let slot = self.slot(TypeId::of::<T>())?;
        slot.get_or_try_init(|| EntityType::resolve(T::definition(), self).map(Arc::new)).cloned()
    }

    pub fn is_resolved<T: Entity>(&self) -> bool {
        self.inner
            .lock()
            .map(|map| map.get(&TypeId::of::<T>()).is_some_and(|slot| slot.get().is_some()))
            .unwrap_or(false)
    }

    pub fn resolved_count(&self) -> usize {
        self.inner.lock().map(|map| map.values().filter(|slot| slot.get().is_some()).count()).unwrap_or(0)
    }
}

/// Places an entity type in a namespace, so schema creation can enumerate every entity of it.
pub struct EntityRegistration {
    pub namespace: &'static str,
    pub resolve: EntityResolver,
}

impl EntityRegistration {
    pub const fn of<T: Entity>(namespace: &'static str) -> Self {
        Self { namespace, resolve: EntityRegistry::resolve::<T> }
    }
}

inventory::collect!(EntityRegistration);

pub fn registrations(namespace: &str) -> Vec<&'static EntityRegistration> {
    inventory::iter::<EntityRegistration>.into_iter().filter(|r| r.namespace == namespace).collect()
}
