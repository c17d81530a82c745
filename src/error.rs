use std::fmt;
use std::time::Duration;

use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Location {
    Entity(usize),
    Camera,
    Spawn,
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Location::Entity(index) => write!(f, "entity #{index}"),
            Location::Camera => write!(f, "camera"),
            Location::Spawn => write!(f, "spawned entity"),
        }
    }
}

/// Structural problems found while committing or parsing a scene.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ValidationError {
    #[error("scene must be a map with `entities` and `camera`, got {found}")]
    MalformedRoot { found: String },
    #[error("`scripts` must be an array of paths, got {found}")]
    MalformedScripts { found: String },
    #[error("`entities` must be an array, got {found}")]
    MalformedEntities { found: String },
    #[error("{location} must be a component map, got {found}")]
    MalformedEntity { location: Location, found: String },
    #[error("scene has no camera")]
    MissingCamera,
    #[error("camera has no `position` component")]
    MissingCameraPosition,
    #[error("{location}: component `{component}` must be a map with `x` and `y`, got {found}")]
    MalformedComponent { location: Location, component: String, found: String },
    #[error("{location}: component `{component}` is missing field `{field}`")]
    PartialComponent { location: Location, component: String, field: &'static str },
    #[error("{location}: component `{component}` has unexpected field `{field}`")]
    UnexpectedField { location: Location, component: String, field: String },
    #[error("{location}: component `{component}` field `{field}` is not a finite number")]
    NonNumericField { location: Location, component: String, field: &'static str },
    #[error("{location}: `_id` must be a non-negative integer")]
    InvalidEntityId { location: Location },
    #[error("{location}: entity id {id} appears more than once")]
    DuplicateEntityId { location: Location, id: u64 },
    #[error("{location}: entity id {id} was not issued by this scene")]
    UnknownEntityId { location: Location, id: u64 },
    #[error("snapshot could not be converted: {message}")]
    Conversion { message: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScriptStage {
    Init,
    Update,
}

impl fmt::Display for ScriptStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            ScriptStage::Init => "init",
            ScriptStage::Update => "update",
        };
        f.write_str(label)
    }
}

/// Failure reported by a script unit before the host attaches identity to it.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum CallError {
    #[error("{0}")]
    Runtime(String),
    #[error("exceeded the {}ms call budget", .0.as_millis())]
    Timeout(Duration),
    #[error(transparent)]
    Invalid(#[from] ValidationError),
}

#[derive(Debug, Error, Clone, PartialEq)]
pub enum ScriptError {
    #[error("failed to load script `{script}`: {message}")]
    Load { script: String, message: String },
    #[error("script `{script}` failed during {stage}: {message}")]
    Runtime { script: String, stage: ScriptStage, message: String },
    #[error("script `{script}` returned an invalid scene during {stage}: {source}")]
    Validation {
        script: String,
        stage: ScriptStage,
        #[source]
        source: ValidationError,
    },
    #[error("script `{script}` exceeded its {}ms budget during {stage}", .limit.as_millis())]
    Timeout { script: String, stage: ScriptStage, limit: Duration },
}

impl ScriptError {
    pub fn load(script: impl Into<String>, message: impl fmt::Display) -> Self {
        ScriptError::Load { script: script.into(), message: message.to_string() }
    }

    pub fn from_call(script: impl Into<String>, stage: ScriptStage, err: CallError) -> Self {
        let script = script.into();
        match err {
            CallError::Runtime(message) => ScriptError::Runtime { script, stage, message },
            CallError::Timeout(limit) => ScriptError::Timeout { script, stage, limit },
            CallError::Invalid(source) => ScriptError::Validation { script, stage, source },
        }
    }

    pub fn script(&self) -> &str {
        match self {
            ScriptError::Load { script, .. }
            | ScriptError::Runtime { script, .. }
            | ScriptError::Validation { script, .. }
            | ScriptError::Timeout { script, .. } => script,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            ScriptError::Load { .. } => "load",
            ScriptError::Runtime { .. } => "runtime",
            ScriptError::Validation { .. } => "validation",
            ScriptError::Timeout { .. } => "timeout",
        }
    }
}
