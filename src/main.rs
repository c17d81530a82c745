use scene_script_host::cli::CliOptions;
use scene_script_host::run_with_options;

fn main() {
    let options = match CliOptions::parse_from_env() {
        Ok(parsed) => parsed,
        Err(err) => {
            eprintln!("[cli] {err}");
            std::process::exit(2);
        }
    };
    if let Err(err) = run_with_options(options) {
        eprintln!("Application error: {err:?}");
        std::process::exit(1);
    }
}
