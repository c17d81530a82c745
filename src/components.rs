use crate::scene::{Component, ComponentMap, Vec2Data, POSITION, SCALE};
use glam::DVec2;

/// Components an entity needs before movement logic may touch it.
pub const MOVABLE: [&str; 2] = [POSITION, SCALE];

/// Capability queries and explicit setters over an entity's optional components.
///
/// Setters never create a component as a side effect of moving it: `update_vec2` and
/// `translate` report `false` and leave the entity alone when the component is absent.
pub trait ComponentAccess {
    fn components(&self) -> &ComponentMap;
    fn components_mut(&mut self) -> &mut ComponentMap;

    fn get_component(&self, name: &str) -> Option<&Component> {
        self.components().get(name)
    }

    fn get_vec2(&self, name: &str) -> Option<Vec2Data> {
        self.get_component(name).and_then(Component::as_vec2)
    }

    fn has_component(&self, name: &str) -> bool {
        self.components().contains_key(name)
    }

    fn has_components(&self, names: &[&str]) -> bool {
        names.iter().all(|name| self.has_component(name))
    }

    fn set_component(&mut self, name: &str, component: Component) -> Option<Component> {
        self.components_mut().insert(name.to_string(), component)
    }

    fn remove_component(&mut self, name: &str) -> Option<Component> {
        self.components_mut().remove(name)
    }

    fn update_vec2<F>(&mut self, name: &str, f: F) -> bool
    where
        F: FnOnce(Vec2Data) -> Vec2Data,
    {
        match self.components_mut().get_mut(name) {
            Some(Component::Vec2(value)) => {
                *value = f(*value);
                true
            }
            _ => false,
        }
    }

    fn translate(&mut self, name: &str, delta: DVec2) -> bool {
        self.update_vec2(name, |value| (DVec2::from(value) + delta).into())
    }
}

pub fn get_component<'a, T: ComponentAccess>(entity: &'a T, name: &str) -> Option<&'a Component> {
    entity.get_component(name)
}

pub fn has_components<T: ComponentAccess>(entity: &T, names: &[&str]) -> bool {
    entity.has_components(names)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scene::{Scene, ZOOM};

    #[test]
    fn capability_queries_require_every_name() {
        let mut scene = Scene::default();
        let id = scene.spawn([(POSITION, Component::Vec2(Vec2Data::new(1.0, 2.0)))]);
        let entity = scene.entity(id).expect("spawned");
        assert!(has_components(entity, &[POSITION]));
        assert!(!has_components(entity, &MOVABLE));
        assert!(has_components(entity, &[]));
        assert_eq!(get_component(entity, SCALE), None);
    }

    #[test]
    fn translate_is_a_no_op_for_missing_components() {
        let mut scene = Scene::default();
        let id = scene.spawn([(SCALE, Component::Vec2(Vec2Data::new(1.0, 1.0)))]);
        let entity = scene.entity_mut(id).expect("spawned");
        let before = entity.clone();
        assert!(!entity.translate(POSITION, DVec2::new(10.0, 0.0)));
        assert_eq!(*entity, before);
        assert!(entity.translate(SCALE, DVec2::new(0.5, -0.5)));
        assert_eq!(entity.get_vec2(SCALE), Some(Vec2Data::new(1.5, 0.5)));
    }

    #[test]
    fn set_and_remove_are_explicit() {
        let mut scene = Scene::default();
        let camera = scene.camera_mut();
        assert!(camera.has_component(ZOOM));
        let previous = camera.set_component(ZOOM, Component::Vec2(Vec2Data::new(2.0, 2.0)));
        assert_eq!(previous.and_then(|c| c.as_vec2()), Some(Vec2Data::new(1.0, 1.0)));
        assert!(camera.remove_component(ZOOM).is_some());
        assert!(!camera.has_component(ZOOM));
    }
}
