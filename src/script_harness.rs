use std::fs::File;
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::config::HostConfig;
use crate::host::ScriptHost;
use crate::input::Input;
use crate::scene::Scene;
use crate::time::Time;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HarnessFixture {
    pub scene: Value,
    /// Rhai scripts, loaded in order. Paths resolve against the working directory.
    pub scripts: Vec<String>,
    #[serde(default = "default_dt")]
    pub dt: f64,
    #[serde(default)]
    pub frames: Vec<FixtureFrame>,
    #[serde(default)]
    pub config: Option<FixtureLimits>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct FixtureFrame {
    #[serde(default)]
    pub held: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FixtureLimits {
    #[serde(default)]
    pub call_timeout_ms: Option<u64>,
    #[serde(default)]
    pub max_operations: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HarnessOutput {
    pub dt: f64,
    pub init_logs: Vec<String>,
    pub frames: Vec<FrameResult>,
    pub scripts: Vec<ScriptSummary>,
    pub final_scene: Value,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FrameResult {
    pub frame: u64,
    pub logs: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub faults: Vec<FaultSummary>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FaultSummary {
    pub script: String,
    pub kind: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ScriptSummary {
    pub name: String,
    pub state: String,
}

fn default_dt() -> f64 {
    1.0 / 60.0
}

pub fn run_fixture(fixture: &HarnessFixture) -> Result<HarnessOutput> {
    let dt = Duration::try_from_secs_f64(fixture.dt).with_context(|| format!("invalid fixture dt {}", fixture.dt))?;
    let mut config = HostConfig::default();
    if let Some(limits) = &fixture.config {
        if let Some(timeout) = limits.call_timeout_ms {
            config.scripts.call_timeout_ms = timeout;
        }
        if let Some(max_operations) = limits.max_operations {
            config.scripts.max_operations = max_operations;
        }
    }
    let mut scene = Scene::from_value(&fixture.scene).context("parsing fixture scene")?;
    let mut host = ScriptHost::new(&config);
    let mut input = Input::new();
    let mut time = Time::new();

    for path in &fixture.scripts {
        host.load_path(path, &mut scene, &input).with_context(|| format!("loading script '{path}'"))?;
    }
    let init_logs = host.log_mut().drain().iter().map(ToString::to_string).collect();

    let mut frames = Vec::with_capacity(fixture.frames.len());
    for step in &fixture.frames {
        input.set_held(step.held.iter().map(String::as_str));
        time.advance(dt);
        let report = host.run_frame(&mut scene, &input, &time);
        input.clear_frame();
        let logs = report.logs.iter().map(ToString::to_string).collect();
        let faults = report
            .faults
            .iter()
            .map(|fault| FaultSummary { script: fault.name.clone(), kind: fault.error.kind().to_string() })
            .collect();
        frames.push(FrameResult { frame: report.frame, logs, faults });
    }

    let scripts = host
        .handles()
        .iter()
        .map(|handle| ScriptSummary { name: handle.name().to_string(), state: handle.state().to_string() })
        .collect();
    Ok(HarnessOutput { dt: fixture.dt, init_logs, frames, scripts, final_scene: scene.to_value() })
}

pub fn load_fixture<P: AsRef<Path>>(path: P) -> Result<HarnessFixture> {
    let file = File::open(path.as_ref()).with_context(|| format!("opening fixture '{}'", path.as_ref().display()))?;
    serde_json::from_reader(file).with_context(|| "parsing fixture JSON")
}
