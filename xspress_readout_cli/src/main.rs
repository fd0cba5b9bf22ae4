//! # xspress_readout_cli
//!
//! Part of the xspress_readout crate family.
//!
//! Replays a recorded Xspress acquisition through the readout pipeline from the command line.
//!
//! ## Use
//!
//! Make a template configuration with
//!
//! ```bash
//! xspress_readout_cli -p config.yml new
//! ```
//!
//! Edit the paths and detector parameters, then run
//!
//! ```bash
//! xspress_readout_cli -p config.yml
//! ```
use clap::{Arg, Command};
use indicatif::{MultiProgress, ProgressBar};
use indicatif_log_bridge::LogWrapper;
use std::path::{Path, PathBuf};
use std::sync::mpsc::{channel, RecvTimeoutError};
use std::sync::Arc;
use std::time::Duration;

use libxspress_readout::config::Config;
use libxspress_readout::process::process;
use libxspress_readout::worker_status::ReadoutPhase;

fn make_template_config(path: &Path) {
    if let Err(e) = Config::default().write_config_file(path) {
        log::error!("Could not create template config file: {e}");
    }
}

/// Library logging goes to a file through spdlog
fn init_file_logger() -> Result<(), spdlog::Error> {
    let file_sink = Arc::new(
        spdlog::sink::FileSink::builder()
            .path(PathBuf::from("./xspress_readout.log"))
            .formatter(Box::new(spdlog::formatter::PatternFormatter::new(
                spdlog::formatter::pattern!(
                    "[{date_short} {time_short}] - [thread: {tid}] - [{^{level}}] - {payload}{eol}"
                ),
            )))
            .truncate(true)
            .build()?,
    );
    let logger = Arc::new(
        spdlog::Logger::builder()
            .flush_level_filter(spdlog::LevelFilter::All)
            .sink(file_sink)
            .build()?,
    );
    spdlog::set_default_logger(logger);
    Ok(())
}

fn main() {
    // Create a cli
    let matches = Command::new("xspress_readout_cli")
        .arg_required_else_help(true)
        .subcommand(Command::new("new").about("Make a template configuration yaml file"))
        .arg(
            Arg::new("path")
                .short('p')
                .long("path")
                .required(true)
                .help("Path to the configuration file"),
        )
        .get_matches();

    // Initialize feedback
    let logger = simplelog::TermLogger::new(
        simplelog::LevelFilter::Info,
        simplelog::Config::default(),
        simplelog::TerminalMode::Mixed,
        simplelog::ColorChoice::Auto,
    );

    let pb_manager = MultiProgress::new();

    LogWrapper::new(pb_manager.clone(), logger)
        .try_init()
        .expect("Could not create logging/progress!");

    if let Err(e) = init_file_logger() {
        log::warn!("Could not create the log file, library messages will be lost: {e}");
    }

    // Parse the cli
    let config_path = PathBuf::from(matches.get_one::<String>("path").expect("We require args"));

    if let Some(("new", _)) = matches.subcommand() {
        log::info!(
            "Making a template config at {}...",
            config_path.to_string_lossy()
        );
        make_template_config(&config_path);
        log::info!("Done.");
        return;
    }

    // Load our config
    log::info!("Loading config from {}...", config_path.to_string_lossy());
    let config = match Config::read_config_file(&config_path) {
        Ok(c) => c,
        Err(e) => {
            log::error!("{e}");
            return;
        }
    };
    log::info!("Config successfully loaded.");
    log::info!("Scaler Path: {}", config.scaler_path.to_string_lossy());
    match &config.spectrum_path {
        Some(path) => log::info!("Spectrum Path: {}", path.to_string_lossy()),
        None => log::info!("Spectrum Path: None"),
    }
    log::info!("Output Path: {}", config.output_path.to_string_lossy());
    log::info!("Frames: {}", config.n_frames);
    log::info!(
        "Elements: {} Mode: {:?} Grade: {:?}",
        config.detector.elements.len(),
        config.detector.mode,
        config.detector.grade
    );
    log::info!("Dead-time Model: {:?}", config.detector.deadtime_model);

    // Setup the progress bar
    let pb = pb_manager.add(ProgressBar::new(100));
    let (tx, rx) = channel();
    // Spawn the task!
    let handle = std::thread::spawn(move || process(config, tx, 0));

    loop {
        match rx.recv_timeout(Duration::from_secs(1)) {
            Ok(status) => {
                pb.set_position((status.progress * 100.0) as u64);
                if status.phase == ReadoutPhase::Finished {
                    log::info!("Read {} frames.", status.frames_read);
                }
            }
            Err(RecvTimeoutError::Timeout) => (),
            // The worker dropped its sender, so it is done one way or another
            Err(RecvTimeoutError::Disconnected) => break,
        }
    }

    match handle.join() {
        Ok(result) => match result {
            Ok(_) => log::info!("Successfully read out data!"),
            Err(e) => log::error!("Readout failed with error: {e}"),
        },
        Err(_) => log::error!("Failed to join readout task!"),
    }

    pb.finish();

    log::info!("Done.");
}
