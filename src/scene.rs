use crate::components::ComponentAccess;
use crate::error::{Location, ValidationError};
use anyhow::{Context, Result};
use serde_json::{json, Map, Value};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::fs;
use std::path::Path;

pub const POSITION: &str = "position";
pub const SCALE: &str = "scale";
pub const ZOOM: &str = "zoom";
pub const VELOCITY: &str = "velocity";

/// Components that always carry an `{x, y}` record.
pub const VECTOR_COMPONENTS: [&str; 4] = [POSITION, SCALE, ZOOM, VELOCITY];

pub(crate) const ENTITY_ID_KEY: &str = "_id";

pub fn is_vector_component(name: &str) -> bool {
    VECTOR_COMPONENTS.contains(&name)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EntityId(u64);

impl EntityId {
    pub const fn from_bits(bits: u64) -> Self {
        Self(bits)
    }

    pub const fn to_bits(self) -> u64 {
        self.0
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Vec2Data {
    pub x: f64,
    pub y: f64,
}

impl Vec2Data {
    pub const fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    fn parse(location: Location, component: &str, value: &Value) -> Result<Self, ValidationError> {
        let Some(map) = value.as_object() else {
            return Err(ValidationError::MalformedComponent {
                location,
                component: component.to_string(),
                found: describe(value).to_string(),
            });
        };
        if let Some(extra) = map.keys().find(|key| *key != "x" && *key != "y") {
            return Err(ValidationError::UnexpectedField {
                location,
                component: component.to_string(),
                field: extra.clone(),
            });
        }
        let x = parse_axis(location, component, map, "x")?;
        let y = parse_axis(location, component, map, "y")?;
        Ok(Self { x, y })
    }

    fn check(self, location: Location, component: &str) -> Result<Self, ValidationError> {
        for (field, value) in [("x", self.x), ("y", self.y)] {
            if !value.is_finite() {
                return Err(ValidationError::NonNumericField { location, component: component.to_string(), field });
            }
        }
        Ok(self)
    }

    fn to_value(self) -> Value {
        json!({ "x": self.x, "y": self.y })
    }
}

fn parse_axis(
    location: Location,
    component: &str,
    map: &Map<String, Value>,
    field: &'static str,
) -> Result<f64, ValidationError> {
    let value = map
        .get(field)
        .ok_or_else(|| ValidationError::PartialComponent { location, component: component.to_string(), field })?;
    value
        .as_f64()
        .filter(|v| v.is_finite())
        .ok_or_else(|| ValidationError::NonNumericField { location, component: component.to_string(), field })
}

impl From<glam::DVec2> for Vec2Data {
    fn from(value: glam::DVec2) -> Self {
        Self { x: value.x, y: value.y }
    }
}

impl From<Vec2Data> for glam::DVec2 {
    fn from(value: Vec2Data) -> Self {
        glam::DVec2::new(value.x, value.y)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Component {
    Vec2(Vec2Data),
    /// Any component the host does not interpret, carried as-is.
    Data(Value),
}

impl Component {
    pub fn parse(location: Location, name: &str, value: &Value) -> Result<Self, ValidationError> {
        if is_vector_component(name) {
            Vec2Data::parse(location, name, value).map(Component::Vec2)
        } else {
            Ok(Component::Data(value.clone()))
        }
    }

    pub fn as_vec2(&self) -> Option<Vec2Data> {
        match self {
            Component::Vec2(v) => Some(*v),
            Component::Data(_) => None,
        }
    }

    pub fn to_value(&self) -> Value {
        match self {
            Component::Vec2(v) => v.to_value(),
            Component::Data(value) => value.clone(),
        }
    }

    // Vector components set as raw data are re-parsed so typed and serialized paths agree.
    fn checked(self, location: Location, name: &str) -> Result<Self, ValidationError> {
        match self {
            Component::Vec2(v) => v.check(location, name).map(Component::Vec2),
            Component::Data(value) if is_vector_component(name) => {
                Vec2Data::parse(location, name, &value).map(Component::Vec2)
            }
            data => Ok(data),
        }
    }
}

impl From<Vec2Data> for Component {
    fn from(value: Vec2Data) -> Self {
        Component::Vec2(value)
    }
}

pub type ComponentMap = BTreeMap<String, Component>;

#[derive(Debug, Clone, PartialEq)]
pub struct SceneEntity {
    id: EntityId,
    components: ComponentMap,
}

impl SceneEntity {
    pub fn id(&self) -> EntityId {
        self.id
    }

    fn to_value(&self, with_id: bool) -> Value {
        let mut map = components_to_map(&self.components);
        if with_id {
            map.insert(ENTITY_ID_KEY.to_string(), Value::from(self.id.0));
        }
        Value::Object(map)
    }
}

impl ComponentAccess for SceneEntity {
    fn components(&self) -> &ComponentMap {
        &self.components
    }

    fn components_mut(&mut self) -> &mut ComponentMap {
        &mut self.components
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Camera {
    components: ComponentMap,
}

impl Camera {
    pub fn new(position: Vec2Data) -> Self {
        let mut components = ComponentMap::new();
        components.insert(POSITION.to_string(), Component::Vec2(position));
        Self { components }
    }

    pub fn position(&self) -> Option<Vec2Data> {
        self.get_vec2(POSITION)
    }
}

impl Default for Camera {
    fn default() -> Self {
        let mut camera = Camera::new(Vec2Data::new(0.0, 0.0));
        camera.set_component(ZOOM, Component::Vec2(Vec2Data::new(1.0, 1.0)));
        camera
    }
}

impl ComponentAccess for Camera {
    fn components(&self) -> &ComponentMap {
        &self.components
    }

    fn components_mut(&mut self) -> &mut ComponentMap {
        &mut self.components
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Scene {
    entities: Vec<SceneEntity>,
    camera: Camera,
    scripts: Vec<String>,
    next_id: u64,
}

impl Default for Scene {
    fn default() -> Self {
        Self::new(Camera::default())
    }
}

impl Scene {
    pub fn new(camera: Camera) -> Self {
        Self { entities: Vec::new(), camera, scripts: Vec::new(), next_id: 1 }
    }

    pub fn entities(&self) -> &[SceneEntity] {
        &self.entities
    }

    pub fn entities_mut(&mut self) -> &mut [SceneEntity] {
        &mut self.entities
    }

    pub fn entity(&self, id: EntityId) -> Option<&SceneEntity> {
        self.entities.iter().find(|entity| entity.id == id)
    }

    pub fn entity_mut(&mut self, id: EntityId) -> Option<&mut SceneEntity> {
        self.entities.iter_mut().find(|entity| entity.id == id)
    }

    pub fn camera(&self) -> &Camera {
        &self.camera
    }

    pub fn camera_mut(&mut self) -> &mut Camera {
        &mut self.camera
    }

    pub fn scripts(&self) -> &[String] {
        &self.scripts
    }

    pub fn set_scripts(&mut self, scripts: Vec<String>) {
        self.scripts = scripts;
    }

    pub fn spawn<I, S>(&mut self, components: I) -> EntityId
    where
        I: IntoIterator<Item = (S, Component)>,
        S: Into<String>,
    {
        let id = self.allocate_id();
        let components = components.into_iter().map(|(name, component)| (name.into(), component)).collect();
        self.entities.push(SceneEntity { id, components });
        id
    }

    /// Spawns an entity given in the external `{component: data}` shape. Any `_id` key is ignored.
    pub fn spawn_value(&mut self, value: &Value) -> Result<EntityId, ValidationError> {
        let (_, components) = parse_component_map(Location::Spawn, value)?;
        let id = self.allocate_id();
        self.entities.push(SceneEntity { id, components });
        Ok(id)
    }

    pub fn despawn(&mut self, id: EntityId) -> Option<SceneEntity> {
        let index = self.entities.iter().position(|entity| entity.id == id)?;
        Some(self.entities.remove(index))
    }

    fn allocate_id(&mut self) -> EntityId {
        let id = EntityId(self.next_id);
        self.next_id += 1;
        id
    }

    /// Parses the scene file shape. Entities receive fresh ids in declaration order.
    pub fn from_value(value: &Value) -> Result<Self, ValidationError> {
        let root = value
            .as_object()
            .ok_or_else(|| ValidationError::MalformedRoot { found: describe(value).to_string() })?;
        let scripts = match root.get("scripts") {
            None | Some(Value::Null) => Vec::new(),
            Some(Value::Array(items)) => items
                .iter()
                .map(|item| {
                    item.as_str()
                        .map(str::to_string)
                        .ok_or_else(|| ValidationError::MalformedScripts { found: describe(item).to_string() })
                })
                .collect::<Result<Vec<_>, _>>()?,
            Some(other) => return Err(ValidationError::MalformedScripts { found: describe(other).to_string() }),
        };
        let (parsed, camera) = parse_root(root)?;
        let mut scene = Scene::new(camera);
        scene.scripts = scripts;
        for (_, components) in parsed {
            let id = scene.allocate_id();
            scene.entities.push(SceneEntity { id, components });
        }
        Ok(scene)
    }

    pub fn from_json_str(source: &str) -> Result<Self> {
        let value: Value = serde_json::from_str(source).context("Parsing scene JSON")?;
        Ok(Scene::from_value(&value)?)
    }

    /// The scene file shape, without entity ids.
    pub fn to_value(&self) -> Value {
        let mut root = Map::new();
        if !self.scripts.is_empty() {
            root.insert("scripts".to_string(), Value::from(self.scripts.clone()));
        }
        root.insert("entities".to_string(), Value::Array(self.entities.iter().map(|e| e.to_value(false)).collect()));
        root.insert("camera".to_string(), Value::Object(components_to_map(&self.camera.components)));
        Value::Object(root)
    }

    pub(crate) fn to_snapshot_value(&self) -> Value {
        json!({
            "entities": self.entities.iter().map(|e| e.to_value(true)).collect::<Vec<_>>(),
            "camera": Value::Object(components_to_map(&self.camera.components)),
        })
    }

    /// Parses a snapshot returned by a script. Entities keep the `_id` they were handed out with;
    /// entities without one are new and get fresh ids from `base`'s allocator.
    pub(crate) fn from_snapshot_value(value: &Value, base: &Scene) -> Result<Self, ValidationError> {
        let root = value
            .as_object()
            .ok_or_else(|| ValidationError::MalformedRoot { found: describe(value).to_string() })?;
        let (parsed, camera) = parse_root(root)?;
        let known: BTreeSet<u64> = base.entities.iter().map(|entity| entity.id.0).collect();
        let mut seen = BTreeSet::new();
        let mut scene = Scene {
            entities: Vec::with_capacity(parsed.len()),
            camera,
            scripts: base.scripts.clone(),
            next_id: base.next_id,
        };
        for (index, (id, components)) in parsed.into_iter().enumerate() {
            let location = Location::Entity(index);
            let id = match id {
                Some(id) if !known.contains(&id) => return Err(ValidationError::UnknownEntityId { location, id }),
                Some(id) if !seen.insert(id) => return Err(ValidationError::DuplicateEntityId { location, id }),
                Some(id) => EntityId(id),
                None => scene.allocate_id(),
            };
            scene.entities.push(SceneEntity { id, components });
        }
        Ok(scene)
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        self.clone().validated_against(self).map(|_| ())
    }

    /// Checks invariants before `self` replaces `base` and normalizes vector components.
    pub(crate) fn validated_against(mut self, base: &Scene) -> Result<Self, ValidationError> {
        self.camera.components = check_components(Location::Camera, self.camera.components)?;
        match self.camera.components.get(POSITION) {
            Some(Component::Vec2(_)) => {}
            _ => return Err(ValidationError::MissingCameraPosition),
        }
        let known: BTreeSet<u64> = base.entities.iter().map(|entity| entity.id.0).collect();
        let issued = base.next_id.max(self.next_id);
        let mut seen = BTreeSet::new();
        let mut entities = Vec::with_capacity(self.entities.len());
        for (index, entity) in self.entities.into_iter().enumerate() {
            let location = Location::Entity(index);
            let id = entity.id.0;
            if !seen.insert(id) {
                return Err(ValidationError::DuplicateEntityId { location, id });
            }
            if !known.contains(&id) && (id < base.next_id || id >= issued) {
                return Err(ValidationError::UnknownEntityId { location, id });
            }
            entities.push(SceneEntity { id: entity.id, components: check_components(location, entity.components)? });
        }
        self.entities = entities;
        self.next_id = issued;
        self.scripts = base.scripts.clone();
        Ok(self)
    }

    pub fn load_from_path(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let bytes = fs::read(path).with_context(|| format!("Reading scene file {}", path.display()))?;
        let value: Value =
            serde_json::from_slice(&bytes).with_context(|| format!("Parsing scene file {}", path.display()))?;
        Scene::from_value(&value).with_context(|| format!("Validating scene file {}", path.display()))
    }

    pub fn save_to_path(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)
                    .with_context(|| format!("Creating scene directory {}", parent.display()))?;
            }
        }
        let json = serde_json::to_string_pretty(&self.to_value())?;
        fs::write(path, json.as_bytes()).with_context(|| format!("Writing scene file {}", path.display()))?;
        Ok(())
    }
}

type ParsedEntity = (Option<u64>, ComponentMap);

fn parse_root(root: &Map<String, Value>) -> Result<(Vec<ParsedEntity>, Camera), ValidationError> {
    let entities = match root.get("entities") {
        None | Some(Value::Null) => Vec::new(),
        Some(Value::Array(items)) => items
            .iter()
            .enumerate()
            .map(|(index, item)| parse_component_map(Location::Entity(index), item))
            .collect::<Result<Vec<_>, _>>()?,
        Some(other) => return Err(ValidationError::MalformedEntities { found: describe(other).to_string() }),
    };
    let camera_value = match root.get("camera") {
        None | Some(Value::Null) => return Err(ValidationError::MissingCamera),
        Some(value) => value,
    };
    let (_, components) = parse_component_map(Location::Camera, camera_value)?;
    if !components.contains_key(POSITION) {
        return Err(ValidationError::MissingCameraPosition);
    }
    Ok((entities, Camera { components }))
}

fn parse_component_map(location: Location, value: &Value) -> Result<ParsedEntity, ValidationError> {
    let map = value
        .as_object()
        .ok_or_else(|| ValidationError::MalformedEntity { location, found: describe(value).to_string() })?;
    let mut id = None;
    let mut components = ComponentMap::new();
    for (name, data) in map {
        if name == ENTITY_ID_KEY {
            id = Some(data.as_u64().ok_or(ValidationError::InvalidEntityId { location })?);
            continue;
        }
        components.insert(name.clone(), Component::parse(location, name, data)?);
    }
    Ok((id, components))
}

fn check_components(location: Location, components: ComponentMap) -> Result<ComponentMap, ValidationError> {
    components
        .into_iter()
        .map(|(name, component)| {
            let component = component.checked(location, &name)?;
            Ok((name, component))
        })
        .collect()
}

fn components_to_map(components: &ComponentMap) -> Map<String, Value> {
    components.iter().map(|(name, component)| (name.clone(), component.to_value())).collect()
}

pub(crate) fn describe(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "a map",
    }
}
