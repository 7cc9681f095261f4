use clap::Parser;
use stereo_calib::cli::{self, Args, Command};
use stereo_calib::error::FatalError;

fn run(args: Args) -> Result<(), FatalError> {
    let config_path = args.config.as_deref();
    match args.command {
        Command::Run(run) => cli::run_calibration(&run, config_path),
        Command::Synth(synth) => cli::synthesize(&synth, config_path),
        Command::ListCameras { session } => cli::list_cameras(session.as_deref(), config_path),
        Command::Config { action } => cli::handle_config_action(action, config_path),
    }
}

fn main() {
    let args = Args::parse();

    let default_level = if args.verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_level))
        .init();

    if let Err(e) = run(args) {
        eprintln!("Error: {}", e);
        std::process::exit(e.exit_code());
    }
}
