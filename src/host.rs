use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::path::Path;
use std::time::Instant;

use crate::config::{HostConfig, ScriptLimits};
use crate::context::{FrameInfo, InputContext, WorldState};
use crate::error::{CallError, ScriptError, ScriptStage};
use crate::input::Input;
use crate::logging::{LogBuffer, LogLevel, LogRecord};
use crate::scene::Scene;
use crate::scripts::{RhaiScript, ScriptHandle, ScriptId, ScriptState, ScriptUnit, UnloadToken};
use crate::time::Time;

#[derive(Debug, Clone, PartialEq)]
pub struct ScriptFault {
    pub script: ScriptId,
    pub name: String,
    pub frame: u64,
    pub error: ScriptError,
}

/// What happened to each handle during one `run_frame`.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct FrameReport {
    pub frame: u64,
    pub committed: Vec<ScriptId>,
    pub faults: Vec<ScriptFault>,
    /// Handles that were not called: faulted, unloaded, or found cancelled.
    pub skipped: Vec<ScriptId>,
    /// Lines the scripts logged this frame, plus host warnings about them. Faults are not repeated here.
    pub logs: Vec<LogRecord>,
}

impl FrameReport {
    fn new(frame: u64) -> Self {
        Self { frame, ..Self::default() }
    }
}

enum CallOutcome {
    Committed,
    Discarded,
    Faulted(ScriptFault),
}

/// Runs script handles against the authoritative scene, one isolated snapshot per call.
///
/// Within a frame, handles run in registration order and each one sees the commits of the
/// handles before it. A failing call never changes the scene; its handle is faulted and skipped
/// until reloaded.
pub struct ScriptHost {
    handles: Vec<ScriptHandle>,
    next_id: u32,
    limits: ScriptLimits,
    frame: u64,
    elapsed_seconds: f64,
    world_state: WorldState,
    log: LogBuffer,
}

impl ScriptHost {
    pub fn new(config: &HostConfig) -> Self {
        Self {
            handles: Vec::new(),
            next_id: 1,
            limits: config.scripts.clone(),
            frame: 0,
            elapsed_seconds: 0.0,
            world_state: WorldState::default(),
            log: LogBuffer::new(config.logging.buffer_capacity),
        }
    }

    pub fn limits(&self) -> &ScriptLimits {
        &self.limits
    }

    /// Registers `unit` and runs its `init` once. An `init` failure leaves the handle faulted;
    /// inspect it with [`ScriptHost::state`] or [`ScriptHost::handle`].
    pub fn load(&mut self, unit: impl ScriptUnit + 'static, scene: &mut Scene, input: &Input) -> ScriptId {
        self.load_boxed(Box::new(unit), scene, input)
    }

    pub fn load_boxed(&mut self, unit: Box<dyn ScriptUnit>, scene: &mut Scene, input: &Input) -> ScriptId {
        let id = ScriptId::new(self.next_id);
        self.next_id += 1;
        self.handles.push(ScriptHandle::new(id, unit));
        let index = self.handles.len() - 1;
        let ctx = self.init_context(input);
        let mut logs = Vec::new();
        self.invoke(index, ScriptStage::Init, &ctx, scene, &mut logs);
        id
    }

    /// Compiles a rhai script from disk and loads it. Only compile and top-level failures are
    /// returned here; an `init` failure still yields a (faulted) handle.
    pub fn load_path(
        &mut self,
        path: impl AsRef<Path>,
        scene: &mut Scene,
        input: &Input,
    ) -> Result<ScriptId, ScriptError> {
        let script = RhaiScript::from_path(path.as_ref(), &self.limits)?;
        log::info!(target: "script", "Loaded {}", path.as_ref().display());
        Ok(self.load(script, scene, input))
    }

    pub fn run_frame(&mut self, scene: &mut Scene, input: &Input, time: &Time) -> FrameReport {
        self.frame += 1;
        self.elapsed_seconds = time.elapsed_seconds();
        let info = FrameInfo {
            frame: self.frame,
            delta_seconds: time.delta_seconds(),
            elapsed_seconds: self.elapsed_seconds,
            world_state: self.world_state,
        };
        let frame_ctx = InputContext::new(input.snapshot(), info);
        let mut report = FrameReport::new(self.frame);
        for index in 0..self.handles.len() {
            let handle = &mut self.handles[index];
            if handle.unload_token().is_requested() && handle.state() != ScriptState::Unloaded {
                handle.set_state(ScriptState::Unloaded);
            }
            if !handle.state().is_live() {
                report.skipped.push(handle.id());
                continue;
            }
            let id = handle.id();
            match self.invoke(index, ScriptStage::Update, &frame_ctx, scene, &mut report.logs) {
                CallOutcome::Committed => report.committed.push(id),
                CallOutcome::Discarded => report.skipped.push(id),
                CallOutcome::Faulted(fault) => report.faults.push(fault),
            }
        }
        report
    }

    /// Re-reads the unit's source, resets its state and runs `init` again. Works for faulted and
    /// unloaded handles alike.
    pub fn reload(&mut self, id: ScriptId, scene: &mut Scene, input: &Input) -> Result<(), ScriptError> {
        let Some(index) = self.index_of(id) else {
            return Err(ScriptError::load(id.to_string(), "no such script"));
        };
        let handle = &mut self.handles[index];
        if let Err(err) = handle.unit_mut().reload() {
            handle.fault(err.clone());
            let script = handle.name().to_string();
            self.log.push(LogRecord { frame: self.frame, script, level: LogLevel::Error, message: err.to_string() });
            return Err(err);
        }
        handle.unload_token().reset();
        handle.set_state(ScriptState::Unloaded);
        let ctx = self.init_context(input);
        let mut logs = Vec::new();
        match self.invoke(index, ScriptStage::Init, &ctx, scene, &mut logs) {
            CallOutcome::Faulted(fault) => Err(fault.error),
            CallOutcome::Committed | CallOutcome::Discarded => Ok(()),
        }
    }

    /// Reloads every handle whose source changed on disk since it was last read.
    pub fn reload_modified(&mut self, scene: &mut Scene, input: &Input) -> Vec<ScriptId> {
        let stale: Vec<ScriptId> = self
            .handles
            .iter()
            .filter(|handle| handle.state() != ScriptState::Unloaded && handle.source_modified())
            .map(ScriptHandle::id)
            .collect();
        for id in &stale {
            if let Err(err) = self.reload(*id, scene, input) {
                log::warn!(target: "script", "Hot reload of {id} failed: {err}");
            }
        }
        stale
    }

    pub fn unload(&mut self, id: ScriptId) -> bool {
        let Some(index) = self.index_of(id) else {
            return false;
        };
        let handle = &mut self.handles[index];
        handle.unload_token().request();
        handle.set_state(ScriptState::Unloaded);
        true
    }

    pub fn unload_token(&self, id: ScriptId) -> Option<UnloadToken> {
        self.handle(id).map(ScriptHandle::unload_token)
    }

    pub fn remove(&mut self, id: ScriptId) -> Option<ScriptHandle> {
        let index = self.index_of(id)?;
        let handle = self.handles.remove(index);
        handle.unload_token().request();
        Some(handle)
    }

    pub fn clear(&mut self) {
        for handle in self.handles.drain(..) {
            handle.unload_token().request();
        }
    }

    pub fn state(&self, id: ScriptId) -> Option<ScriptState> {
        self.handle(id).map(ScriptHandle::state)
    }

    pub fn handle(&self, id: ScriptId) -> Option<&ScriptHandle> {
        self.handles.iter().find(|handle| handle.id() == id)
    }

    pub fn handles(&self) -> &[ScriptHandle] {
        &self.handles
    }

    pub fn frame(&self) -> u64 {
        self.frame
    }

    /// Reported to scripts as `ctx.world_state` from the next call on.
    pub fn set_world_state(&mut self, state: WorldState) {
        self.world_state = state;
    }

    pub fn world_state(&self) -> WorldState {
        self.world_state
    }

    pub fn log(&self) -> &LogBuffer {
        &self.log
    }

    pub fn log_mut(&mut self) -> &mut LogBuffer {
        &mut self.log
    }

    fn index_of(&self, id: ScriptId) -> Option<usize> {
        self.handles.iter().position(|handle| handle.id() == id)
    }

    fn init_context(&self, input: &Input) -> InputContext {
        let info = FrameInfo {
            frame: self.frame,
            delta_seconds: 0.0,
            elapsed_seconds: self.elapsed_seconds,
            world_state: self.world_state,
        };
        InputContext::new(input.snapshot(), info)
    }

    // One guarded call: snapshot, run under the watchdog, forward logs, then commit and spawn,
    // or fault the handle and leave the scene alone.
    fn invoke(
        &mut self,
        index: usize,
        stage: ScriptStage,
        frame_ctx: &InputContext,
        scene: &mut Scene,
        logs: &mut Vec<LogRecord>,
    ) -> CallOutcome {
        let frame = self.frame;
        let limit = self.limits.call_timeout();
        let max_logs = self.limits.max_logs_per_call;
        let handle = &mut self.handles[index];
        let id = handle.id();
        let name = handle.name().to_string();
        let token = handle.unload_token();

        let deadline = if limit.is_zero() { None } else { Instant::now().checked_add(limit) };
        let ctx = frame_ctx.for_call(&name, deadline, max_logs);
        let snapshot = scene.snapshot();
        let started = Instant::now();
        let unit = handle.unit_mut();
        let result = panic::catch_unwind(AssertUnwindSafe(|| match stage {
            ScriptStage::Init => unit.init(&ctx, snapshot),
            ScriptStage::Update => unit.update(&ctx, snapshot),
        }));
        let elapsed = started.elapsed();

        let output = ctx.take_output();
        let mut records: Vec<LogRecord> = output
            .logs
            .into_iter()
            .map(|(level, message)| LogRecord { frame, script: name.clone(), level, message })
            .collect();
        if output.dropped_logs > 0 {
            let message = format!("{} log lines dropped (limit {max_logs} per call)", output.dropped_logs);
            records.push(LogRecord { frame, script: name.clone(), level: LogLevel::Warn, message });
        }

        let result = match result {
            Ok(Ok(_)) if !limit.is_zero() && elapsed > limit => Err(CallError::Timeout(limit)),
            Ok(result) => result,
            Err(payload) => Err(CallError::Runtime(format!("panicked: {}", panic_message(payload.as_ref())))),
        };

        let outcome = if token.is_requested() {
            handle.set_state(ScriptState::Unloaded);
            CallOutcome::Discarded
        } else {
            match result.and_then(|snapshot| scene.commit(snapshot).map_err(CallError::from)) {
                Ok(()) => {
                    for entity in &output.spawned {
                        if let Err(err) = scene.spawn_value(entity) {
                            let message = format!("Failed to spawn entity: {err}");
                            records.push(LogRecord { frame, script: name.clone(), level: LogLevel::Warn, message });
                        }
                    }
                    handle.set_state(match stage {
                        ScriptStage::Init => ScriptState::Initialized,
                        ScriptStage::Update => ScriptState::Running,
                    });
                    CallOutcome::Committed
                }
                Err(err) => {
                    let error = ScriptError::from_call(&name, stage, err);
                    handle.fault(error.clone());
                    CallOutcome::Faulted(ScriptFault { script: id, name: name.clone(), frame, error })
                }
            }
        };

        for record in records {
            self.log.push(record.clone());
            logs.push(record);
        }
        // Faults travel in the report; the console log gets a line with the frame number.
        if let CallOutcome::Faulted(fault) = &outcome {
            let message = format!("frame {frame}: {}", fault.error);
            self.log.push(LogRecord { frame, script: name, level: LogLevel::Error, message });
        }
        outcome
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scripts::NativeScript;

    #[test]
    fn frames_count_up_and_empty_hosts_do_nothing() {
        let mut host = ScriptHost::new(&HostConfig::default());
        let mut scene = Scene::default();
        let before = scene.clone();
        let report = host.run_frame(&mut scene, &Input::new(), &Time::new());
        assert_eq!(report.frame, 1);
        assert!(report.committed.is_empty() && report.faults.is_empty());
        assert_eq!(scene, before);
    }

    #[test]
    fn init_logs_are_recorded_with_the_script_name() {
        let mut host = ScriptHost::new(&HostConfig::default());
        let mut scene = Scene::default();
        let unit = NativeScript::new("greeter", |_, scene| Ok(scene)).with_init(|ctx, scene| {
            ctx.log_info("Hello, script!");
            Ok(scene)
        });
        let id = host.load(unit, &mut scene, &Input::new());
        assert_eq!(host.state(id), Some(ScriptState::Initialized));
        assert_eq!(host.log().text(), "[info] greeter: Hello, script!\n");
    }

    #[test]
    fn excess_logs_are_dropped_with_a_warning() {
        let mut config = HostConfig::default();
        config.scripts.max_logs_per_call = 1;
        let mut host = ScriptHost::new(&config);
        let mut scene = Scene::default();
        host.load(
            NativeScript::new("chatty", |ctx, scene| {
                for i in 0..3 {
                    ctx.log_info(format!("line {i}"));
                }
                Ok(scene)
            }),
            &mut scene,
            &Input::new(),
        );
        let report = host.run_frame(&mut scene, &Input::new(), &Time::new());
        assert_eq!(report.logs.len(), 2);
        assert_eq!(report.logs[1].level, LogLevel::Warn);
        assert!(report.logs[1].message.starts_with("2 log lines dropped"));
    }

    #[test]
    fn panic_messages_are_extracted() {
        let payload: Box<dyn Any + Send> = Box::new("boom");
        assert_eq!(panic_message(payload.as_ref()), "boom");
        let payload: Box<dyn Any + Send> = Box::new(String::from("bang"));
        assert_eq!(panic_message(payload.as_ref()), "bang");
    }
}
