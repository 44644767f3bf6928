//! Identity map: one live instance per (class, natural key).

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use serde_json::Value;
use tracing::trace;

use skelmap_core::{MapperError, MapperResult, ObjectData, ObjectHandle, ObjectId};

/// Derives the identifier of an object of a given class from raw data.
pub trait IdentityStrategy: Send + Sync {
    /// Fields that make up the identifier of `class_name`.
    fn identifier_fields(&self, class_name: &str) -> Vec<String>;

    /// Identifier values extracted from `data`.
    ///
    /// `None` unless every identifier field is present and non-null.
    fn identifier(&self, class_name: &str, data: &ObjectData) -> Option<ObjectData> {
        let mut identifier = ObjectData::new();
        for field in self.identifier_fields(class_name) {
            match data.get(&field) {
                None | Some(Value::Null) => return None,
                Some(value) => {
                    identifier.insert(field, value.clone());
                }
            }
        }
        (!identifier.is_empty()).then_some(identifier)
    }
}

/// Identifier fields by name: a default list plus per-class overrides.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldIdentityStrategy {
    default_fields: Vec<String>,
    class_fields: HashMap<String, Vec<String>>,
}

impl FieldIdentityStrategy {
    pub fn new(default_fields: Vec<String>) -> Self {
        Self {
            default_fields,
            class_fields: HashMap::new(),
        }
    }

    pub fn with_class(mut self, class_name: impl Into<String>, fields: Vec<String>) -> Self {
        self.class_fields.insert(class_name.into(), fields);
        self
    }
}

impl Default for FieldIdentityStrategy {
    fn default() -> Self {
        Self::new(vec!["id".to_string()])
    }
}

impl IdentityStrategy for FieldIdentityStrategy {
    fn identifier_fields(&self, class_name: &str) -> Vec<String> {
        self.class_fields
            .get(class_name)
            .unwrap_or(&self.default_fields)
            .clone()
    }
}

/// Canonical string form of an identifier.
///
/// `ObjectData` keeps keys sorted, so equal identifiers always serialize the same way.
pub fn natural_key(identifier: &ObjectData) -> String {
    Value::Object(identifier.clone()).to_string()
}

#[derive(Default)]
struct IdentityMapState {
    by_key: HashMap<String, HashMap<String, ObjectHandle>>,
    by_object: HashMap<ObjectId, (String, String)>,
}

/// Registry of live instances keyed by class and natural key.
///
/// Shared (via `Arc`) between the unit of work and the rest of the session.
/// It is only mutated through [`add_to_identity_map`](Self::add_to_identity_map),
/// [`detach`](Self::detach) and [`clear`](Self::clear).
pub struct ObjectIdentityMap {
    strategy: Arc<dyn IdentityStrategy>,
    state: RwLock<IdentityMapState>,
}

impl ObjectIdentityMap {
    pub fn new(strategy: Arc<dyn IdentityStrategy>) -> Self {
        Self {
            strategy,
            state: RwLock::new(IdentityMapState::default()),
        }
    }

    pub fn strategy(&self) -> &Arc<dyn IdentityStrategy> {
        &self.strategy
    }

    /// Natural key for `data`, failing if the class identifier is incomplete.
    pub fn key_for(&self, class_name: &str, data: &ObjectData) -> MapperResult<String> {
        self.strategy
            .identifier(class_name, data)
            .map(|identifier| natural_key(&identifier))
            .ok_or_else(|| MapperError::missing_identifier(class_name))
    }

    /// Live instance registered for the key derived from `data`, if any.
    pub fn try_get_by_id(&self, class_name: &str, data: &ObjectData) -> MapperResult<Option<ObjectHandle>> {
        let key = self.key_for(class_name, data)?;
        Ok(self
            .read()
            .by_key
            .get(class_name)
            .and_then(|objects| objects.get(&key))
            .cloned())
    }

    /// Register `object` under the key derived from `data`.
    ///
    /// Re-registering the same instance is idempotent; if its key changed it
    /// moves to the new key. A different instance already holding the key is
    /// an identity collision.
    pub fn add_to_identity_map(&self, object: &ObjectHandle, data: &ObjectData) -> MapperResult<()> {
        let class_name = object.class_name().to_string();
        let key = self.key_for(&class_name, data)?;

        let mut state = self.write();

        if let Some(existing) = state.by_key.get(&class_name).and_then(|o| o.get(&key)) {
            if existing != object {
                return Err(MapperError::IdentityCollision { class_name, key });
            }
            return Ok(());
        }

        if let Some((old_class, old_key)) = state.by_object.remove(&object.id()) {
            if let Some(objects) = state.by_key.get_mut(&old_class) {
                objects.remove(&old_key);
            }
        }

        trace!(class_name = %class_name, key = %key, object_id = %object.id(), "identity registered");
        state
            .by_key
            .entry(class_name.clone())
            .or_default()
            .insert(key.clone(), object.clone());
        state.by_object.insert(object.id(), (class_name, key));
        Ok(())
    }

    pub fn contains(&self, object: &ObjectHandle) -> bool {
        self.read().by_object.contains_key(&object.id())
    }

    /// Resolve a registered handle from its identity token.
    pub fn get(&self, object: ObjectId) -> Option<ObjectHandle> {
        let state = self.read();
        let (class_name, key) = state.by_object.get(&object)?;
        state.by_key.get(class_name)?.get(key).cloned()
    }

    /// Remove `object`; returns whether it was registered.
    pub fn detach(&self, object: &ObjectHandle) -> bool {
        let mut state = self.write();
        let Some((class_name, key)) = state.by_object.remove(&object.id()) else {
            return false;
        };
        if let Some(objects) = state.by_key.get_mut(&class_name) {
            objects.remove(&key);
        }
        true
    }

    /// Remove every entry, or only those of `class_name`.
    pub fn clear(&self, class_name: Option<&str>) {
        let mut state = self.write();
        match class_name {
            Some(class_name) => {
                if let Some(objects) = state.by_key.remove(class_name) {
                    for object in objects.values() {
                        state.by_object.remove(&object.id());
                    }
                }
            }
            None => *state = IdentityMapState::default(),
        }
    }

    pub fn len(&self) -> usize {
        self.read().by_object.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn read(&self) -> RwLockReadGuard<'_, IdentityMapState> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, IdentityMapState> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for ObjectIdentityMap {
    fn default() -> Self {
        Self::new(Arc::new(FieldIdentityStrategy::default()))
    }
}

impl core::fmt::Debug for ObjectIdentityMap {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("ObjectIdentityMap")
            .field("len", &self.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::any::Any;

    struct Row(&'static str);

    impl skelmap_core::MappedObject for Row {
        fn class_name(&self) -> &str {
            self.0
        }

        fn as_any(&self) -> &dyn Any {
            self
        }
    }

    fn data(value: Value) -> ObjectData {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn returns_the_registered_instance() {
        let map = ObjectIdentityMap::default();
        let user = ObjectHandle::new(Row("User"));

        map.add_to_identity_map(&user, &data(json!({ "id": 1, "name": "a" }))).unwrap();

        let found = map.try_get_by_id("User", &data(json!({ "id": 1 }))).unwrap();
        assert_eq!(found, Some(user.clone()));
        assert!(map.try_get_by_id("User", &data(json!({ "id": 2 }))).unwrap().is_none());
        assert!(map.try_get_by_id("Group", &data(json!({ "id": 1 }))).unwrap().is_none());
        assert_eq!(map.get(user.id()), Some(user));
    }

    #[test]
    fn re_registration_is_idempotent() {
        let map = ObjectIdentityMap::default();
        let user = ObjectHandle::new(Row("User"));

        map.add_to_identity_map(&user, &data(json!({ "id": 1 }))).unwrap();
        map.add_to_identity_map(&user, &data(json!({ "id": 1 }))).unwrap();
        assert_eq!(map.len(), 1);
    }

    #[test]
    fn distinct_instance_under_same_key_collides() {
        let map = ObjectIdentityMap::default();
        let first = ObjectHandle::new(Row("User"));
        let second = ObjectHandle::new(Row("User"));

        map.add_to_identity_map(&first, &data(json!({ "id": 7 }))).unwrap();
        let err = map
            .add_to_identity_map(&second, &data(json!({ "id": 7 })))
            .unwrap_err();

        assert!(matches!(err, MapperError::IdentityCollision { ref class_name, .. } if class_name == "User"));
        assert!(!map.contains(&second));
    }

    #[test]
    fn missing_or_null_identifier_is_rejected() {
        let map = ObjectIdentityMap::default();
        let user = ObjectHandle::new(Row("User"));

        assert_eq!(
            map.add_to_identity_map(&user, &data(json!({ "name": "a" }))),
            Err(MapperError::missing_identifier("User"))
        );
        assert_eq!(
            map.try_get_by_id("User", &data(json!({ "id": null }))),
            Err(MapperError::missing_identifier("User"))
        );
    }

    #[test]
    fn composite_keys_ignore_field_order() {
        let strategy = FieldIdentityStrategy::default()
            .with_class("Membership", vec!["user_id".into(), "group_id".into()]);
        let map = ObjectIdentityMap::new(Arc::new(strategy));
        let membership = ObjectHandle::new(Row("Membership"));

        map.add_to_identity_map(&membership, &data(json!({ "group_id": 2, "user_id": 1 })))
            .unwrap();

        let found = map
            .try_get_by_id("Membership", &data(json!({ "user_id": 1, "group_id": 2, "role": "x" })))
            .unwrap();
        assert_eq!(found, Some(membership));
    }

    #[test]
    fn key_change_moves_the_entry() {
        let map = ObjectIdentityMap::default();
        let user = ObjectHandle::new(Row("User"));

        map.add_to_identity_map(&user, &data(json!({ "id": 1 }))).unwrap();
        map.add_to_identity_map(&user, &data(json!({ "id": 2 }))).unwrap();

        assert!(map.try_get_by_id("User", &data(json!({ "id": 1 }))).unwrap().is_none());
        assert_eq!(map.try_get_by_id("User", &data(json!({ "id": 2 }))).unwrap(), Some(user.clone()));
        assert_eq!(map.len(), 1);
    }

    #[test]
    fn detach_and_scoped_clear() {
        let map = ObjectIdentityMap::default();
        let user = ObjectHandle::new(Row("User"));
        let group = ObjectHandle::new(Row("Group"));
        map.add_to_identity_map(&user, &data(json!({ "id": 1 }))).unwrap();
        map.add_to_identity_map(&group, &data(json!({ "id": 1 }))).unwrap();

        map.clear(Some("Group"));
        assert!(map.contains(&user));
        assert!(!map.contains(&group));

        assert!(map.detach(&user));
        assert!(!map.detach(&user));
        assert!(map.is_empty());

        map.add_to_identity_map(&user, &data(json!({ "id": 1 }))).unwrap();
        map.clear(None);
        assert!(map.is_empty());
    }
}
