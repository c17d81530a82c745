use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde_json::Value;

use crate::config::HostConfig;
use crate::context::WorldState;
use crate::error::{ScriptError, ValidationError};
use crate::host::{FrameReport, ScriptHost};
use crate::input::{Input, KeyCode, KeyId, KeyState};
use crate::scene::{EntityId, Scene};
use crate::scripts::{ScriptId, ScriptUnit};
use crate::time::Time;

/// The engine-facing side of the bridge: the authoritative scene, the scripts it declares,
/// and the per-frame update that drives them.
pub struct World {
    scene: Scene,
    initial_scene: Scene,
    scene_dir: Option<PathBuf>,
    host: ScriptHost,
    scene_scripts: Vec<ScriptId>,
    load_errors: Vec<ScriptError>,
    input: Input,
    time: Time,
    debug_keys: bool,
}

impl World {
    pub fn new(config: HostConfig) -> Self {
        Self {
            scene: Scene::default(),
            initial_scene: Scene::default(),
            scene_dir: None,
            host: ScriptHost::new(&config),
            scene_scripts: Vec::new(),
            load_errors: Vec::new(),
            input: Input::new(),
            time: Time::new(),
            debug_keys: true,
        }
    }

    /// F4 reloads scripts and F5 resets the scene at the start of `update`. On by default.
    pub fn set_debug_keys(&mut self, enabled: bool) {
        self.debug_keys = enabled;
    }

    pub fn load_scene(&mut self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let scene = Scene::load_from_path(path)?;
        self.scene_dir = path.parent().map(Path::to_path_buf);
        self.install(scene);
        log::info!("Loaded scene {}", path.display());
        Ok(())
    }

    /// Script paths in an inline scene resolve against the working directory.
    pub fn load_scene_str(&mut self, json: &str) -> Result<()> {
        let scene = Scene::from_json_str(json)?;
        self.scene_dir = None;
        self.install(scene);
        Ok(())
    }

    pub fn load_scene_value(&mut self, value: &Value) -> Result<()> {
        let scene = Scene::from_value(value).context("Validating scene")?;
        self.scene_dir = None;
        self.install(scene);
        Ok(())
    }

    fn install(&mut self, scene: Scene) {
        self.initial_scene = scene.clone();
        self.scene = scene;
        self.load_scene_scripts();
    }

    /// Restores the scene as it was loaded and restarts its scripts.
    pub fn reload_scene(&mut self) {
        self.scene = self.initial_scene.clone();
        self.load_scene_scripts();
        log::info!("Scene reset");
    }

    /// Re-reads every script the scene declares and runs their `init` against the current scene.
    pub fn reload_scripts(&mut self) {
        self.load_scene_scripts();
        log::info!("Scripts reloaded");
    }

    fn load_scene_scripts(&mut self) {
        for id in self.scene_scripts.drain(..) {
            self.host.remove(id);
        }
        self.load_errors.clear();
        let paths: Vec<PathBuf> = self.scene.scripts().iter().map(|path| self.resolve(path)).collect();
        for path in paths {
            match self.host.load_path(&path, &mut self.scene, &self.input) {
                Ok(id) => self.scene_scripts.push(id),
                Err(err) => {
                    log::error!(target: "script", "{err}");
                    self.load_errors.push(err);
                }
            }
        }
    }

    fn resolve(&self, script: &str) -> PathBuf {
        let path = Path::new(script);
        match &self.scene_dir {
            Some(dir) if path.is_relative() => dir.join(path),
            _ => path.to_path_buf(),
        }
    }

    /// Registers an extra unit that is not part of the scene file. It survives script reloads.
    pub fn add_script(&mut self, unit: impl ScriptUnit + 'static) -> ScriptId {
        self.host.load(unit, &mut self.scene, &self.input)
    }

    pub fn update(&mut self) -> FrameReport {
        self.time.tick();
        self.step()
    }

    /// Same as [`World::update`] with a fixed time step.
    pub fn update_with_dt(&mut self, dt: Duration) -> FrameReport {
        self.time.advance(dt);
        self.step()
    }

    fn step(&mut self) -> FrameReport {
        if self.debug_keys {
            if pressed(&self.input, KeyCode::F5) {
                self.reload_scene();
            } else if pressed(&self.input, KeyCode::F4) {
                self.reload_scripts();
            }
        }
        self.host.reload_modified(&mut self.scene, &self.input);
        let report = self.host.run_frame(&mut self.scene, &self.input, &self.time);
        self.input.clear_frame();
        report
    }

    pub fn set_state(&mut self, state: WorldState) {
        self.host.set_world_state(state);
    }

    pub fn state(&self) -> WorldState {
        self.host.world_state()
    }

    pub fn spawn_entity(&mut self, entity: &Value) -> Result<EntityId, ValidationError> {
        self.scene.spawn_value(entity)
    }

    pub fn scene(&self) -> &Scene {
        &self.scene
    }

    pub fn scene_mut(&mut self) -> &mut Scene {
        &mut self.scene
    }

    pub fn initial_scene(&self) -> &Scene {
        &self.initial_scene
    }

    pub fn scene_scripts(&self) -> &[ScriptId] {
        &self.scene_scripts
    }

    pub fn load_errors(&self) -> &[ScriptError] {
        &self.load_errors
    }

    pub fn host(&self) -> &ScriptHost {
        &self.host
    }

    pub fn host_mut(&mut self) -> &mut ScriptHost {
        &mut self.host
    }

    pub fn input(&self) -> &Input {
        &self.input
    }

    pub fn input_mut(&mut self) -> &mut Input {
        &mut self.input
    }

    pub fn time(&self) -> &Time {
        &self.time
    }
}

fn pressed(input: &Input, key: KeyCode) -> bool {
    input.key_state(&KeyId::Code(key)).contains(KeyState::PRESSED)
}
