use crate::input::{KeyId, KeyMap, KeyState};
use crate::logging::LogLevel;
use serde_json::Value;
use std::cell::RefCell;
use std::fmt;
use std::mem;
use std::rc::Rc;
use std::time::Instant;

/// What the engine around the scripts is currently doing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WorldState {
    Editor,
    Menu,
    #[default]
    Gameplay,
}

impl WorldState {
    pub fn as_str(self) -> &'static str {
        match self {
            WorldState::Editor => "Editor",
            WorldState::Menu => "Menu",
            WorldState::Gameplay => "Gameplay",
        }
    }
}

impl fmt::Display for WorldState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct FrameInfo {
    pub frame: u64,
    pub delta_seconds: f64,
    pub elapsed_seconds: f64,
    pub world_state: WorldState,
}

/// Everything a script queued during one call. Drained by the host once the call returns.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ContextOutput {
    pub logs: Vec<(LogLevel, String)>,
    pub dropped_logs: usize,
    pub spawned: Vec<Value>,
}

/// Read-only view of the frame handed to a script call.
///
/// Queries never fail: unknown key names are simply not down. Logging and spawning only queue
/// into a per-call buffer, so nothing a script does through the context touches the world
/// directly.
#[derive(Debug, Clone)]
pub struct InputContext {
    keys: Rc<KeyMap>,
    info: FrameInfo,
    script: Rc<str>,
    deadline: Option<Instant>,
    max_logs: usize,
    output: Rc<RefCell<ContextOutput>>,
}

impl InputContext {
    pub fn new(keys: KeyMap, info: FrameInfo) -> Self {
        Self {
            keys: Rc::new(keys),
            info,
            script: Rc::from(""),
            deadline: None,
            max_logs: usize::MAX,
            output: Rc::default(),
        }
    }

    /// A copy of this frame context bound to one script call, with an empty output queue.
    pub fn for_call(&self, script: &str, deadline: Option<Instant>, max_logs: usize) -> Self {
        Self {
            keys: Rc::clone(&self.keys),
            info: self.info,
            script: Rc::from(script),
            deadline,
            max_logs,
            output: Rc::default(),
        }
    }

    fn key_state(&self, key: &str) -> KeyState {
        self.keys.get(&KeyId::parse(key)).copied().unwrap_or_default()
    }

    pub fn is_key_down(&self, key: &str) -> bool {
        self.key_state(key).contains(KeyState::DOWN)
    }

    pub fn is_key_pressed(&self, key: &str) -> bool {
        self.key_state(key).contains(KeyState::PRESSED)
    }

    pub fn is_key_released(&self, key: &str) -> bool {
        self.key_state(key).contains(KeyState::RELEASED)
    }

    pub fn log_info(&self, message: impl Into<String>) {
        self.push_log(LogLevel::Info, message.into());
    }

    pub fn log_warn(&self, message: impl Into<String>) {
        self.push_log(LogLevel::Warn, message.into());
    }

    pub fn log_error(&self, message: impl Into<String>) {
        self.push_log(LogLevel::Error, message.into());
    }

    fn push_log(&self, level: LogLevel, message: String) {
        let Ok(mut output) = self.output.try_borrow_mut() else {
            return;
        };
        if output.logs.len() >= self.max_logs {
            output.dropped_logs += 1;
        } else {
            output.logs.push((level, message));
        }
    }

    /// Queues an entity (in the scene file shape) to be added once this call commits.
    pub fn spawn_entity(&self, entity: Value) {
        if let Ok(mut output) = self.output.try_borrow_mut() {
            output.spawned.push(entity);
        }
    }

    pub fn script_name(&self) -> &str {
        &self.script
    }

    pub fn frame(&self) -> u64 {
        self.info.frame
    }

    pub fn delta_time(&self) -> f64 {
        self.info.delta_seconds
    }

    pub fn elapsed(&self) -> f64 {
        self.info.elapsed_seconds
    }

    pub fn fps(&self) -> f64 {
        if self.info.delta_seconds > 0.0 {
            1.0 / self.info.delta_seconds
        } else {
            0.0
        }
    }

    pub fn world_state(&self) -> WorldState {
        self.info.world_state
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    pub fn take_output(&self) -> ContextOutput {
        self.output.try_borrow_mut().map(|mut output| mem::take(&mut *output)).unwrap_or_default()
    }
}
