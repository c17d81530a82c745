use crate::config::HostConfigOverrides;
use anyhow::{anyhow, bail, Context, Result};
use std::env;
use std::path::PathBuf;
use std::time::Duration;

const DEFAULT_FRAMES: u32 = 1;
const DEFAULT_DT: f64 = 1.0 / 60.0;

#[derive(Debug, Clone, PartialEq)]
pub struct CliOptions {
    pub scene: Option<PathBuf>,
    pub frames: u32,
    pub hold: Vec<String>,
    pub dt: f64,
    pub config: Option<PathBuf>,
    pub output: Option<PathBuf>,
    timeout_ms: Option<u64>,
    max_ops: Option<u64>,
}

impl Default for CliOptions {
    fn default() -> Self {
        Self {
            scene: None,
            frames: DEFAULT_FRAMES,
            hold: Vec::new(),
            dt: DEFAULT_DT,
            config: None,
            output: None,
            timeout_ms: None,
            max_ops: None,
        }
    }
}

impl CliOptions {
    pub fn parse_from_env() -> Result<Self> {
        Self::parse(env::args())
    }

    pub fn parse<I, S>(args: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut options = CliOptions::default();
        let mut iter = args.into_iter();
        let _ = iter.next(); // skip program name if present
        while let Some(raw_flag) = iter.next() {
            let flag = raw_flag.as_ref();
            let Some(key) = flag.strip_prefix("--") else {
                bail!("Unexpected argument '{flag}'. Flags take the form --name value.");
            };
            let value =
                iter.next().ok_or_else(|| anyhow!("Expected a value after '{flag}'"))?.as_ref().to_string();
            match key {
                "scene" => options.scene = Some(PathBuf::from(value)),
                "frames" => {
                    options.frames = value.parse::<u32>().with_context(|| format!("Invalid frames '{value}'"))?;
                }
                "hold" => {
                    options.hold.extend(value.split(',').map(str::trim).filter(|k| !k.is_empty()).map(String::from));
                }
                "dt" => {
                    let dt = value.parse::<f64>().with_context(|| format!("Invalid dt '{value}'"))?;
                    if Duration::try_from_secs_f64(dt).is_err() {
                        bail!("Invalid dt '{value}'. Use a non-negative number of seconds.");
                    }
                    options.dt = dt;
                }
                "config" => options.config = Some(PathBuf::from(value)),
                "output" => options.output = Some(PathBuf::from(value)),
                "timeout-ms" => {
                    options.timeout_ms =
                        Some(value.parse::<u64>().with_context(|| format!("Invalid timeout-ms '{value}'"))?);
                }
                "max-ops" => {
                    options.max_ops =
                        Some(value.parse::<u64>().with_context(|| format!("Invalid max-ops '{value}'"))?);
                }
                _ => bail!(
                    "Unknown flag '{flag}'. Supported flags: --scene, --frames, --hold, --dt, --config, \
                     --timeout-ms, --max-ops, --output."
                ),
            }
        }
        Ok(options)
    }

    pub fn config_overrides(&self) -> HostConfigOverrides {
        HostConfigOverrides { call_timeout_ms: self.timeout_ms, max_operations: self.max_ops }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_scene_frames_and_held_keys() {
        let args = ["app", "--scene", "level.json", "--frames", "3", "--hold", "W, D", "--hold", "Up"];
        let options = CliOptions::parse(args).expect("parse options");
        assert_eq!(options.scene, Some(PathBuf::from("level.json")));
        assert_eq!(options.frames, 3);
        assert_eq!(options.hold, vec!["W", "D", "Up"]);
        assert_eq!(options.dt, DEFAULT_DT);
    }

    #[test]
    fn latest_flag_wins() {
        let args = ["app", "--timeout-ms", "10", "--timeout-ms", "4", "--max-ops", "1000"];
        let options = CliOptions::parse(args).expect("parse options");
        let overrides = options.config_overrides();
        assert_eq!(overrides.call_timeout_ms, Some(4));
        assert_eq!(overrides.max_operations, Some(1000));
    }

    #[test]
    fn missing_value_errors() {
        let err = CliOptions::parse(["app", "--frames"]).unwrap_err();
        assert!(err.to_string().contains("Expected a value"), "error should mention missing value");
    }

    #[test]
    fn rejects_unknown_flags_and_bad_numbers() {
        let err = CliOptions::parse(["app", "--foo", "bar"]).unwrap_err();
        assert!(err.to_string().contains("Unknown flag"), "unknown flags should error");
        let err = CliOptions::parse(["app", "--dt", "-1"]).unwrap_err();
        assert!(err.to_string().contains("Invalid dt"));
        let err = CliOptions::parse(["app", "--dt", "1e30"]).unwrap_err();
        assert!(err.to_string().contains("Invalid dt"));
        assert!(CliOptions::parse(["app", "--frames", "many"]).is_err());
    }
}
