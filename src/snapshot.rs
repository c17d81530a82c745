use crate::error::ValidationError;
use crate::scene::Scene;
use rhai::Dynamic;
use serde_json::Value;
use std::ops::{Deref, DerefMut};

/// A deep, mutation-isolated copy of the authoritative scene handed to one script call.
///
/// Nothing written to a snapshot reaches the world until [`Scene::commit`] accepts it.
#[derive(Debug, Clone, PartialEq)]
pub struct SceneSnapshot {
    scene: Scene,
}

impl SceneSnapshot {
    pub fn scene(&self) -> &Scene {
        &self.scene
    }

    pub fn into_scene(self) -> Scene {
        self.scene
    }

    /// The serialized shape scripts see, including each entity's `_id`.
    pub fn to_value(&self) -> Value {
        self.scene.to_snapshot_value()
    }

    pub fn from_value(value: &Value, base: &SceneSnapshot) -> Result<Self, ValidationError> {
        Scene::from_snapshot_value(value, &base.scene).map(|scene| Self { scene })
    }

    pub fn to_dynamic(&self) -> Result<Dynamic, ValidationError> {
        rhai::serde::to_dynamic(self.to_value())
            .map_err(|err| ValidationError::Conversion { message: err.to_string() })
    }

    pub fn from_dynamic(value: &Dynamic, base: &SceneSnapshot) -> Result<Self, ValidationError> {
        let json: Value = rhai::serde::from_dynamic(value)
            .map_err(|err| ValidationError::Conversion { message: err.to_string() })?;
        Self::from_value(&json, base)
    }
}

impl Deref for SceneSnapshot {
    type Target = Scene;

    fn deref(&self) -> &Scene {
        &self.scene
    }
}

impl DerefMut for SceneSnapshot {
    fn deref_mut(&mut self) -> &mut Scene {
        &mut self.scene
    }
}

impl Scene {
    pub fn snapshot(&self) -> SceneSnapshot {
        SceneSnapshot { scene: self.clone() }
    }

    /// Validates `snapshot` and, only if every invariant holds, replaces this scene with it.
    /// The list of scene scripts is owned by the engine and survives every commit.
    pub fn commit(&mut self, snapshot: SceneSnapshot) -> Result<(), ValidationError> {
        let next = snapshot.scene.validated_against(self)?;
        *self = next;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::components::ComponentAccess;
    use crate::error::Location;
    use crate::scene::{Component, EntityId, Vec2Data, POSITION, SCALE};
    use serde_json::json;

    fn scene() -> Scene {
        Scene::from_value(&json!({
            "scripts": ["a.rhai"],
            "entities": [
                { "position": { "x": 0, "y": 0 }, "scale": { "x": 1, "y": 1 } },
                { "sprite": { "texture": "tree", "flip_x": false }, "position": { "x": 3, "y": 4 } }
            ],
            "camera": { "position": { "x": 0, "y": 0 } }
        }))
        .expect("scene parses")
    }

    #[test]
    fn commit_then_snapshot_is_identity() {
        let mut scene = scene();
        let snapshot = scene.snapshot();
        scene.commit(snapshot.clone()).expect("commit");
        assert_eq!(scene.snapshot(), snapshot);
    }

    #[test]
    fn dynamic_conversion_is_lossless() {
        let snapshot = scene().snapshot();
        let dynamic = snapshot.to_dynamic().expect("to dynamic");
        let back = SceneSnapshot::from_dynamic(&dynamic, &snapshot).expect("from dynamic");
        assert_eq!(back, snapshot);
    }

    #[test]
    fn snapshot_mutations_stay_private_until_commit() {
        let mut scene = scene();
        let mut snapshot = scene.snapshot();
        snapshot.entities_mut()[0].set_component(POSITION, Component::Vec2(Vec2Data::new(5.0, 5.0)));
        assert_eq!(scene.entities()[0].get_vec2(POSITION), Some(Vec2Data::new(0.0, 0.0)));
        scene.commit(snapshot).expect("commit");
        assert_eq!(scene.entities()[0].get_vec2(POSITION), Some(Vec2Data::new(5.0, 5.0)));
    }

    #[test]
    fn failed_commit_keeps_prior_state() {
        let mut scene = scene();
        let before = scene.clone();
        let mut snapshot = scene.snapshot();
        snapshot.entities_mut()[0].set_component(SCALE, Component::Data(json!({ "x": 2 })));
        snapshot.camera_mut().set_component(POSITION, Component::Vec2(Vec2Data::new(9.0, 9.0)));
        let err = scene.commit(snapshot).unwrap_err();
        assert_eq!(
            err,
            ValidationError::PartialComponent { location: Location::Entity(0), component: SCALE.into(), field: "y" }
        );
        assert_eq!(scene, before);
    }

    #[test]
    fn camera_cannot_be_removed() {
        let mut scene = scene();
        let mut snapshot = scene.snapshot();
        snapshot.camera_mut().remove_component(POSITION);
        assert_eq!(scene.commit(snapshot).unwrap_err(), ValidationError::MissingCameraPosition);

        let base = scene.snapshot();
        let mut value = base.to_value();
        value.as_object_mut().expect("map").remove("camera");
        assert_eq!(SceneSnapshot::from_value(&value, &base).unwrap_err(), ValidationError::MissingCamera);
    }

    #[test]
    fn raw_vector_data_is_normalized_on_commit() {
        let mut scene = scene();
        let mut snapshot = scene.snapshot();
        snapshot.entities_mut()[1].set_component(SCALE, Component::Data(json!({ "x": 2, "y": 3 })));
        scene.commit(snapshot).expect("commit");
        assert_eq!(scene.entities()[1].get_component(SCALE), Some(&Component::Vec2(Vec2Data::new(2.0, 3.0))));
    }

    #[test]
    fn returned_ids_are_checked() {
        let base = scene().snapshot();
        let mut value = base.to_value();
        let entities = value["entities"].as_array_mut().expect("entities");
        entities[1]["_id"] = json!(1);
        assert_eq!(
            SceneSnapshot::from_value(&value, &base).unwrap_err(),
            ValidationError::DuplicateEntityId { location: Location::Entity(1), id: 1 }
        );
        entities_mut(&mut value)[1]["_id"] = json!(77);
        assert_eq!(
            SceneSnapshot::from_value(&value, &base).unwrap_err(),
            ValidationError::UnknownEntityId { location: Location::Entity(1), id: 77 }
        );
    }

    #[test]
    fn entities_without_ids_are_new() {
        let mut scene = scene();
        let base = scene.snapshot();
        let mut value = base.to_value();
        entities_mut(&mut value).push(json!({ "position": { "x": 1, "y": 1 } }));
        let returned = SceneSnapshot::from_value(&value, &base).expect("parse");
        scene.commit(returned).expect("commit");
        assert_eq!(scene.entities().len(), 3);
        assert_eq!(scene.entities()[2].id(), EntityId::from_bits(3));
        assert_eq!(scene.scripts(), ["a.rhai"]);
    }

    fn entities_mut(value: &mut Value) -> &mut Vec<Value> {
        value["entities"].as_array_mut().expect("entities")
    }
}
