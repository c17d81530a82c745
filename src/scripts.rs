use std::cell::Cell;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::rc::Rc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime};

use glam::DVec2;
use rhai::{Array, CallFnOptions, Dynamic, Engine, EvalAltResult, Map, Scope, AST};

use crate::components::{ComponentAccess, MOVABLE};
use crate::config::ScriptLimits;
use crate::context::InputContext;
use crate::error::{CallError, ScriptError};
use crate::scene::{Scene, POSITION};
use crate::snapshot::SceneSnapshot;

/// The contract every script runtime fulfils. Both entry points take the snapshot by value and
/// hand back the scene the script wants committed; the host decides whether it is accepted.
pub trait ScriptUnit {
    fn name(&self) -> &str;

    fn init(&mut self, ctx: &InputContext, scene: SceneSnapshot) -> Result<SceneSnapshot, CallError>;

    fn update(&mut self, ctx: &InputContext, scene: SceneSnapshot) -> Result<SceneSnapshot, CallError>;

    /// Drops per-handle state and re-reads the source if there is one.
    fn reload(&mut self) -> Result<(), ScriptError> {
        Ok(())
    }

    fn source_modified(&self) -> bool {
        false
    }
}

/// Script name as shown in logs: the last path segment without its extension.
pub fn script_name_from_path(path: &Path) -> String {
    path.file_stem().map(|stem| stem.to_string_lossy().into_owned()).unwrap_or_else(|| path.display().to_string())
}

enum ScriptSource {
    File { path: PathBuf, last_modified: Option<SystemTime> },
    Inline(String),
}

pub struct RhaiScript {
    name: String,
    engine: Engine,
    ast: AST,
    scope: Scope<'static>,
    state: Dynamic,
    source: ScriptSource,
    deadline: Rc<Cell<Option<Instant>>>,
    timeout: Duration,
    has_init: bool,
}

impl RhaiScript {
    pub fn from_path(path: impl AsRef<Path>, limits: &ScriptLimits) -> Result<Self, ScriptError> {
        let path = path.as_ref();
        let name = script_name_from_path(path);
        let source = fs::read_to_string(path)
            .map_err(|err| ScriptError::load(&name, format!("reading {}: {err}", path.display())))?;
        let last_modified = modified_time(path);
        let mut script = Self::build(name, limits, ScriptSource::File { path: path.to_path_buf(), last_modified });
        script.install(&source)?;
        Ok(script)
    }

    pub fn from_source(
        name: impl Into<String>,
        source: impl Into<String>,
        limits: &ScriptLimits,
    ) -> Result<Self, ScriptError> {
        let source = source.into();
        let mut script = Self::build(name.into(), limits, ScriptSource::Inline(source.clone()));
        script.install(&source)?;
        Ok(script)
    }

    fn build(name: String, limits: &ScriptLimits, source: ScriptSource) -> Self {
        let deadline = Rc::new(Cell::new(None));
        let engine = build_engine(limits, Rc::clone(&deadline));
        Self {
            name,
            engine,
            ast: AST::empty(),
            scope: Scope::new(),
            state: Dynamic::from_map(Map::new()),
            source,
            deadline,
            timeout: limits.call_timeout(),
            has_init: false,
        }
    }

    pub fn path(&self) -> Option<&Path> {
        match &self.source {
            ScriptSource::File { path, .. } => Some(path),
            ScriptSource::Inline(_) => None,
        }
    }

    /// Per-handle state, bound as `this` inside `init` and `update`.
    pub fn state(&self) -> &Dynamic {
        &self.state
    }

    // Compiles, checks entry points, then runs top-level statements once under the call budget.
    fn install(&mut self, source: &str) -> Result<(), ScriptError> {
        let ast = self.engine.compile(source).map_err(|err| ScriptError::load(&self.name, err))?;
        let mut has_init = false;
        let mut has_update = false;
        for function in ast.iter_functions() {
            match (function.name, function.params.len()) {
                ("init", 2) => has_init = true,
                ("update", 2) => has_update = true,
                _ => {}
            }
        }
        if !has_update {
            return Err(ScriptError::load(&self.name, "missing `fn update(ctx, scene)`"));
        }
        let mut scope = Scope::new();
        self.deadline.set(deadline_after(self.timeout));
        let result = self.engine.run_ast_with_scope(&mut scope, &ast);
        self.deadline.set(None);
        result.map_err(|err| ScriptError::load(&self.name, err))?;
        self.ast = ast;
        self.scope = scope;
        self.state = Dynamic::from_map(Map::new());
        self.has_init = has_init;
        Ok(())
    }

    fn call(&mut self, entry: &str, ctx: &InputContext, scene: SceneSnapshot) -> Result<SceneSnapshot, CallError> {
        let input = scene.to_dynamic()?;
        self.deadline.set(ctx.deadline());
        let options = CallFnOptions::new().eval_ast(false).rewind_scope(true).bind_this_ptr(&mut self.state);
        let args = (ctx.clone(), input);
        let result = self.engine.call_fn_with_options::<Dynamic>(options, &mut self.scope, &self.ast, entry, args);
        self.deadline.set(None);
        let output = result.map_err(|err| classify_eval_error(&err, self.timeout))?;
        Ok(SceneSnapshot::from_dynamic(&output, &scene)?)
    }
}

impl ScriptUnit for RhaiScript {
    fn name(&self) -> &str {
        &self.name
    }

    fn init(&mut self, ctx: &InputContext, scene: SceneSnapshot) -> Result<SceneSnapshot, CallError> {
        if !self.has_init {
            return Ok(scene);
        }
        self.call("init", ctx, scene)
    }

    fn update(&mut self, ctx: &InputContext, scene: SceneSnapshot) -> Result<SceneSnapshot, CallError> {
        self.call("update", ctx, scene)
    }

    fn reload(&mut self) -> Result<(), ScriptError> {
        let source = match &mut self.source {
            ScriptSource::File { path, last_modified } => {
                let source = fs::read_to_string(&*path)
                    .map_err(|err| ScriptError::load(&self.name, format!("reading {}: {err}", path.display())))?;
                // Recorded before compiling so a broken edit is tried once, not every frame.
                *last_modified = modified_time(path);
                source
            }
            ScriptSource::Inline(source) => source.clone(),
        };
        self.install(&source)
    }

    fn source_modified(&self) -> bool {
        match &self.source {
            ScriptSource::File { path, last_modified } => match (modified_time(path), last_modified) {
                (Some(current), Some(previous)) => current > *previous,
                (Some(_), None) => true,
                (None, _) => false,
            },
            ScriptSource::Inline(_) => false,
        }
    }
}

impl fmt::Debug for RhaiScript {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RhaiScript").field("name", &self.name).field("path", &self.path()).finish()
    }
}

fn modified_time(path: &Path) -> Option<SystemTime> {
    fs::metadata(path).ok().and_then(|meta| meta.modified().ok())
}

fn deadline_after(timeout: Duration) -> Option<Instant> {
    if timeout.is_zero() {
        None
    } else {
        Instant::now().checked_add(timeout)
    }
}

// Termination from the progress callback or the operation limit is a timeout wherever it
// surfaces in the call chain; anything else is a runtime error reported verbatim.
fn classify_eval_error(err: &EvalAltResult, timeout: Duration) -> CallError {
    if is_termination(err) {
        CallError::Timeout(timeout)
    } else {
        CallError::Runtime(err.to_string())
    }
}

fn is_termination(err: &EvalAltResult) -> bool {
    match err {
        EvalAltResult::ErrorTerminated(..) | EvalAltResult::ErrorTooManyOperations(..) => true,
        EvalAltResult::ErrorInFunctionCall(_, _, inner, _) => is_termination(inner),
        _ => false,
    }
}

const DEADLINE_CHECK_INTERVAL: u64 = 256;

fn build_engine(limits: &ScriptLimits, deadline: Rc<Cell<Option<Instant>>>) -> Engine {
    let mut engine = Engine::new();
    engine.set_fast_operators(true);
    engine.set_max_operations(limits.max_operations);
    engine.set_max_call_levels(limits.max_call_levels);
    engine.set_max_expr_depths(limits.max_expr_depth, limits.max_expr_depth);
    engine.on_progress(move |ops| {
        if ops % DEADLINE_CHECK_INTERVAL != 0 {
            return None;
        }
        match deadline.get() {
            Some(limit) if Instant::now() >= limit => Some(Dynamic::UNIT),
            _ => None,
        }
    });
    engine.on_print(|text| log::info!(target: "script", "{text}"));
    engine.on_debug(|text, source, pos| log::debug!(target: "script", "{} {pos}: {text}", source.unwrap_or("")));
    register_api(&mut engine);
    engine
}

fn register_api(engine: &mut Engine) {
    engine.register_type_with_name::<InputContext>("Context");
    engine.register_fn("is_key_down", ctx_is_key_down);
    engine.register_fn("is_key_pressed", ctx_is_key_pressed);
    engine.register_fn("is_key_released", ctx_is_key_released);
    engine.register_fn("log_info", ctx_log_info);
    engine.register_fn("log_warn", ctx_log_warn);
    engine.register_fn("log_error", ctx_log_error);
    engine.register_fn("spawn_entity", ctx_spawn_entity);
    engine.register_fn("spawn_entity", ctx_spawn_entity_json);
    engine.register_fn("spawn_entity", ctx_spawn_entity_other);
    engine.register_get("frame", |ctx: &mut InputContext| ctx.frame() as rhai::INT);
    engine.register_get("delta_time", |ctx: &mut InputContext| ctx.delta_time() as rhai::FLOAT);
    engine.register_get("elapsed", |ctx: &mut InputContext| ctx.elapsed() as rhai::FLOAT);
    engine.register_get("fps", |ctx: &mut InputContext| ctx.fps() as rhai::FLOAT);
    engine.register_get("world_state", |ctx: &mut InputContext| ctx.world_state().as_str().to_string());
    engine.register_fn("has_components", map_has_components);
}

fn ctx_is_key_down(ctx: &mut InputContext, key: &str) -> bool {
    ctx.is_key_down(key)
}

fn ctx_is_key_pressed(ctx: &mut InputContext, key: &str) -> bool {
    ctx.is_key_pressed(key)
}

fn ctx_is_key_released(ctx: &mut InputContext, key: &str) -> bool {
    ctx.is_key_released(key)
}

fn ctx_log_info(ctx: &mut InputContext, message: Dynamic) {
    ctx.log_info(message.to_string());
}

fn ctx_log_warn(ctx: &mut InputContext, message: Dynamic) {
    ctx.log_warn(message.to_string());
}

fn ctx_log_error(ctx: &mut InputContext, message: Dynamic) {
    ctx.log_error(message.to_string());
}

fn ctx_spawn_entity(ctx: &mut InputContext, entity: Map) {
    match rhai::serde::from_dynamic::<serde_json::Value>(&Dynamic::from_map(entity)) {
        Ok(value) => ctx.spawn_entity(value),
        Err(err) => ctx.log_error(format!("Failed to spawn entity: {err}")),
    }
}

fn ctx_spawn_entity_json(ctx: &mut InputContext, entity: &str) {
    match serde_json::from_str::<serde_json::Value>(entity) {
        Ok(value) => ctx.spawn_entity(value),
        Err(err) => ctx.log_error(format!("Failed to spawn entity: {err}")),
    }
}

fn ctx_spawn_entity_other(ctx: &mut InputContext, entity: Dynamic) {
    ctx.log_error(format!("Failed to spawn entity: expected a map or a JSON string, got {}", entity.type_name()));
}

fn map_has_components(entity: Map, names: Array) -> bool {
    names.into_iter().all(|name| name.into_string().map_or(false, |name| entity.contains_key(name.as_str())))
}

type NativeFn = Box<dyn FnMut(&InputContext, SceneSnapshot) -> Result<SceneSnapshot, CallError>>;

/// A script unit backed by Rust closures. `init` defaults to handing the scene back unchanged.
pub struct NativeScript {
    name: String,
    init: Option<NativeFn>,
    update: NativeFn,
}

impl NativeScript {
    pub fn new<F>(name: impl Into<String>, update: F) -> Self
    where
        F: FnMut(&InputContext, SceneSnapshot) -> Result<SceneSnapshot, CallError> + 'static,
    {
        Self { name: name.into(), init: None, update: Box::new(update) }
    }

    pub fn with_init<F>(mut self, init: F) -> Self
    where
        F: FnMut(&InputContext, SceneSnapshot) -> Result<SceneSnapshot, CallError> + 'static,
    {
        self.init = Some(Box::new(init));
        self
    }
}

impl ScriptUnit for NativeScript {
    fn name(&self) -> &str {
        &self.name
    }

    fn init(&mut self, ctx: &InputContext, scene: SceneSnapshot) -> Result<SceneSnapshot, CallError> {
        match self.init.as_mut() {
            Some(init) => init(ctx, scene),
            None => Ok(scene),
        }
    }

    fn update(&mut self, ctx: &InputContext, scene: SceneSnapshot) -> Result<SceneSnapshot, CallError> {
        (self.update)(ctx, scene)
    }
}

impl fmt::Debug for NativeScript {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NativeScript").field("name", &self.name).finish()
    }
}

/// Keyboard movement for every entity with a position and a scale, plus camera panning.
#[derive(Debug, Clone, PartialEq)]
pub struct MovementPolicy {
    pub speed: f64,
    pub camera_step: f64,
}

impl MovementPolicy {
    pub const SPEED: f64 = 10.0;
    pub const CAMERA_STEP: f64 = 10.0;

    pub fn apply(&self, ctx: &InputContext, scene: &mut Scene) {
        let mut delta = DVec2::ZERO;
        if ctx.is_key_down("W") {
            delta.y -= self.speed;
        } else if ctx.is_key_down("S") {
            delta.y += self.speed;
        }
        if ctx.is_key_down("A") {
            delta.x -= self.speed;
        } else if ctx.is_key_down("D") {
            delta.x += self.speed;
        }
        if delta != DVec2::ZERO {
            for entity in scene.entities_mut() {
                if entity.has_components(&MOVABLE) {
                    entity.translate(POSITION, delta);
                }
            }
        }

        // Vertical panning is exclusive, horizontal keys each apply.
        let mut pan = DVec2::ZERO;
        if ctx.is_key_down("Up") {
            pan.y -= self.camera_step;
        } else if ctx.is_key_down("Down") {
            pan.y += self.camera_step;
        }
        if ctx.is_key_down("Left") {
            pan.x -= self.camera_step;
        }
        if ctx.is_key_down("Right") {
            pan.x += self.camera_step;
        }
        if pan != DVec2::ZERO {
            scene.camera_mut().translate(POSITION, pan);
        }
    }
}

impl Default for MovementPolicy {
    fn default() -> Self {
        Self { speed: Self::SPEED, camera_step: Self::CAMERA_STEP }
    }
}

impl ScriptUnit for MovementPolicy {
    fn name(&self) -> &str {
        "movement"
    }

    fn init(&mut self, ctx: &InputContext, scene: SceneSnapshot) -> Result<SceneSnapshot, CallError> {
        ctx.log_info("Hello, script!");
        Ok(scene)
    }

    fn update(&mut self, ctx: &InputContext, mut scene: SceneSnapshot) -> Result<SceneSnapshot, CallError> {
        self.apply(ctx, &mut scene);
        Ok(scene)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ScriptId(u32);

impl ScriptId {
    pub(crate) const fn new(raw: u32) -> Self {
        Self(raw)
    }

    pub const fn raw(self) -> u32 {
        self.0
    }
}

impl fmt::Display for ScriptId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "script#{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScriptState {
    Unloaded,
    Initialized,
    Running,
    Faulted,
}

impl ScriptState {
    /// Whether the host still calls `update` for a handle in this state.
    pub fn is_live(self) -> bool {
        matches!(self, ScriptState::Initialized | ScriptState::Running)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ScriptState::Unloaded => "unloaded",
            ScriptState::Initialized => "initialized",
            ScriptState::Running => "running",
            ScriptState::Faulted => "faulted",
        }
    }
}

impl fmt::Display for ScriptState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Cancellation flag shared between a handle and whoever wants it gone. Requesting unload never
/// interrupts a running call; the host discards that call's result instead.
#[derive(Debug, Clone, Default)]
pub struct UnloadToken(Arc<AtomicBool>);

impl UnloadToken {
    pub fn request(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_requested(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    pub(crate) fn reset(&self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// Owns one script unit and its lifecycle.
pub struct ScriptHandle {
    id: ScriptId,
    unit: Box<dyn ScriptUnit>,
    state: ScriptState,
    token: UnloadToken,
    last_error: Option<ScriptError>,
}

impl ScriptHandle {
    pub(crate) fn new(id: ScriptId, unit: Box<dyn ScriptUnit>) -> Self {
        Self { id, unit, state: ScriptState::Unloaded, token: UnloadToken::default(), last_error: None }
    }

    pub fn id(&self) -> ScriptId {
        self.id
    }

    pub fn name(&self) -> &str {
        self.unit.name()
    }

    pub fn state(&self) -> ScriptState {
        self.state
    }

    pub fn last_error(&self) -> Option<&ScriptError> {
        self.last_error.as_ref()
    }

    pub fn unload_token(&self) -> UnloadToken {
        self.token.clone()
    }

    pub(crate) fn unit_mut(&mut self) -> &mut dyn ScriptUnit {
        self.unit.as_mut()
    }

    pub(crate) fn source_modified(&self) -> bool {
        self.unit.source_modified()
    }

    pub(crate) fn set_state(&mut self, state: ScriptState) {
        self.state = state;
        if state != ScriptState::Faulted {
            self.last_error = None;
        }
    }

    pub(crate) fn fault(&mut self, error: ScriptError) {
        self.state = ScriptState::Faulted;
        self.last_error = Some(error);
    }
}

impl fmt::Debug for ScriptHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScriptHandle")
            .field("id", &self.id)
            .field("name", &self.name())
            .field("state", &self.state)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::{FrameInfo, WorldState};
    use crate::input::{Input, KeyCode};
    use crate::scene::Vec2Data;
    use serde_json::json;

    fn scene() -> Scene {
        Scene::from_value(&json!({
            "entities": [
                { "position": { "x": 0, "y": 0 }, "scale": { "x": 1, "y": 1 } },
                { "position": { "x": 5, "y": 5 } }
            ],
            "camera": { "position": { "x": 0, "y": 0 } }
        }))
        .expect("scene parses")
    }

    fn ctx(keys: &[KeyCode]) -> InputContext {
        let mut input = Input::new();
        for key in keys {
            input.press(*key);
        }
        InputContext::new(input.snapshot(), FrameInfo { frame: 1, delta_seconds: 1.0 / 60.0, ..FrameInfo::default() })
    }

    #[test]
    fn names_come_from_the_file_stem() {
        assert_eq!(script_name_from_path(Path::new("assets/scripts/movement.rhai")), "movement");
        assert_eq!(script_name_from_path(Path::new("player.tar.rhai")), "player.tar");
    }

    #[test]
    fn rhai_load_requires_update() {
        let err = RhaiScript::from_source("broken", "fn init(ctx, scene) { scene }", &ScriptLimits::default())
            .unwrap_err();
        assert_eq!(err.kind(), "load");
        assert!(err.to_string().contains("update"));

        let err = RhaiScript::from_source("syntax", "fn update(ctx, scene) { scene", &ScriptLimits::default())
            .unwrap_err();
        assert_eq!(err.kind(), "load");
    }

    #[test]
    fn rhai_update_sees_context_and_this() {
        let source = r#"
            fn update(ctx, scene) {
                if !("calls" in this) { this.calls = 0; }
                this.calls += 1;
                if ctx.is_key_down("D") && has_components(scene.entities[0], ["position", "scale"]) {
                    scene.entities[0].position.x += 10.0 * this.calls;
                }
                ctx.log_info(`frame ${ctx.frame}`);
                scene
            }
        "#;
        let mut script = RhaiScript::from_source("counter", source, &ScriptLimits::default()).expect("load");
        let base = scene();
        let ctx = ctx(&[KeyCode::D]);
        let once = script.update(&ctx, base.snapshot()).expect("first update");
        let twice = script.update(&ctx, once).expect("second update");
        assert_eq!(twice.entities()[0].get_vec2(POSITION), Some(Vec2Data::new(30.0, 0.0)));
        let output = ctx.take_output();
        assert_eq!(output.logs.len(), 2);
        assert_eq!(output.logs[0].1, "frame 1");
    }

    #[test]
    fn rhai_reads_the_world_state() {
        let source = "fn update(ctx, scene) { ctx.log_info(ctx.world_state); scene }";
        let mut script = RhaiScript::from_source("state", source, &ScriptLimits::default()).expect("load");
        let info = FrameInfo { world_state: WorldState::Editor, ..FrameInfo::default() };
        let ctx = InputContext::new(Input::new().snapshot(), info);
        script.update(&ctx, scene().snapshot()).expect("update");
        assert_eq!(ctx.take_output().logs[0].1, "Editor");
    }

    #[test]
    fn rhai_infinite_loop_is_a_timeout() {
        let limits = ScriptLimits { max_operations: 0, call_timeout_ms: 5, ..ScriptLimits::default() };
        let mut script =
            RhaiScript::from_source("spin", "fn update(ctx, scene) { loop {} }", &limits).expect("load");
        let frame = ctx(&[]);
        let call = frame.for_call("spin", deadline_after(limits.call_timeout()), 8);
        let err = script.update(&call, scene().snapshot()).unwrap_err();
        assert_eq!(err, CallError::Timeout(Duration::from_millis(5)));
    }

    #[test]
    fn rhai_bad_return_is_a_validation_error() {
        let mut script = RhaiScript::from_source(
            "eraser",
            "fn update(ctx, scene) { scene.remove(\"camera\"); scene }",
            &ScriptLimits::default(),
        )
        .expect("load");
        let err = script.update(&ctx(&[]), scene().snapshot()).unwrap_err();
        assert!(matches!(err, CallError::Invalid(_)), "unexpected error {err:?}");
    }

    #[test]
    fn movement_policy_moves_only_movable_entities() {
        let mut policy = MovementPolicy::default();
        let base = scene();
        let moved = policy.update(&ctx(&[KeyCode::W, KeyCode::S, KeyCode::D]), base.snapshot()).expect("update");
        assert_eq!(moved.entities()[0].get_vec2(POSITION), Some(Vec2Data::new(10.0, -10.0)));
        assert_eq!(moved.entities()[1].get_vec2(POSITION), Some(Vec2Data::new(5.0, 5.0)));
        assert_eq!(moved.camera().position(), Some(Vec2Data::new(0.0, 0.0)));
    }

    #[test]
    fn unload_tokens_are_shared() {
        let token = UnloadToken::default();
        let remote = token.clone();
        remote.request();
        assert!(token.is_requested());
        token.reset();
        assert!(!remote.is_requested());
    }
}
