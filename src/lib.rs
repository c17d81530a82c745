pub mod app;
pub mod cli;
pub mod components;
pub mod config;
pub mod context;
pub mod error;
pub mod host;
pub mod input;
pub mod logging;
pub mod scene;
pub mod script_harness;
pub mod scripts;
pub mod snapshot;
pub mod time;
pub mod world;

pub use app::{run, run_with_options};
pub use components::ComponentAccess;
pub use context::{FrameInfo, InputContext, WorldState};
pub use error::{CallError, ScriptError, ScriptStage, ValidationError};
pub use host::{FrameReport, ScriptFault, ScriptHost};
pub use scene::{Camera, Component, EntityId, Scene, SceneEntity, Vec2Data};
pub use scripts::{
    MovementPolicy, NativeScript, RhaiScript, ScriptHandle, ScriptId, ScriptState, ScriptUnit, UnloadToken,
};
pub use snapshot::SceneSnapshot;
pub use world::World;
