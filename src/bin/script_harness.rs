use std::env;
use std::fs;
use std::path::PathBuf;

use anyhow::{anyhow, bail, Context, Result};
use scene_script_host::logging::init_logging;
use scene_script_host::script_harness::{load_fixture, run_fixture, HarnessOutput};

fn main() {
    init_logging(None);
    if let Err(err) = run_cli() {
        eprintln!("[script-harness] error: {err:?}");
        std::process::exit(1);
    }
}

struct HarnessArgs {
    fixture: PathBuf,
    write_output: Option<PathBuf>,
    golden: Option<PathBuf>,
}

fn run_cli() -> Result<()> {
    let Some(args) = parse_args(env::args().skip(1))? else {
        print_help();
        return Ok(());
    };
    let fixture = load_fixture(&args.fixture)?;
    let output = run_fixture(&fixture).with_context(|| format!("running fixture {}", args.fixture.display()))?;
    let rendered = serde_json::to_string_pretty(&output).context("serializing harness output")?;

    if let Some(path) = &args.write_output {
        if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
            fs::create_dir_all(parent)
                .with_context(|| format!("creating output directory '{}'", parent.display()))?;
        }
        fs::write(path, format!("{rendered}\n"))
            .with_context(|| format!("writing harness output to '{}'", path.display()))?;
        println!("[script-harness] wrote {}", path.display());
    }

    match &args.golden {
        Some(path) => {
            let source =
                fs::read_to_string(path).with_context(|| format!("opening golden file '{}'", path.display()))?;
            let expected: HarnessOutput = serde_json::from_str(&source).context("parsing golden JSON")?;
            if expected != output {
                bail!(
                    "golden mismatch for {} (use --write-output to refresh):\n{}",
                    args.fixture.display(),
                    rendered
                );
            }
            println!("[script-harness] matched golden {}", path.display());
        }
        None if args.write_output.is_none() => println!("{rendered}"),
        None => {}
    }
    Ok(())
}

fn parse_args(mut args: impl Iterator<Item = String>) -> Result<Option<HarnessArgs>> {
    let mut fixture = None;
    let mut write_output = None;
    let mut golden = None;
    while let Some(arg) = args.next() {
        let slot = match arg.as_str() {
            "--fixture" | "-f" => &mut fixture,
            "--write-output" | "-o" => &mut write_output,
            "--golden" | "-g" => &mut golden,
            "--help" | "-h" => return Ok(None),
            other => return Err(anyhow!("unknown argument '{other}'")),
        };
        let value = args.next().ok_or_else(|| anyhow!("'{arg}' expects a path"))?;
        *slot = Some(PathBuf::from(value));
    }
    let fixture = fixture.ok_or_else(|| anyhow!("--fixture <path> is required"))?;
    Ok(Some(HarnessArgs { fixture, write_output, golden }))
}

fn print_help() {
    println!("Usage: script_harness --fixture <path> [--golden <path>] [--write-output <path>]");
    println!("  -f, --fixture        Harness fixture JSON (scene, scripts, held keys per frame)");
    println!("  -g, --golden         Golden output to compare against");
    println!("  -o, --write-output   Write the actual output JSON here");
}
