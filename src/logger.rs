use chrono::Local;
use fern::Dispatch;
use log::LevelFilter;
use std::fs;
use tracing_log::LogTracer;

// Define where to store logs
const LOG_DIR: &str = "logs";
const LOG_FILE: &str = "kernel.log";

/// Initializes the global logger.
///
/// This function should be called once at the very beginning of the
/// application's `main` function.
///
/// Log level is controlled by the `RUST_LOG` environment variable.
/// Example: `RUST_LOG=debug cargo run`
///
/// If `RUST_LOG` is not set, it defaults to `info`. Logs are written to
/// `logs/kernel.log` and the console. `LogTracer` bridges any `tracing`
/// events emitted by dependency crates into the same `log`-backed
/// dispatcher as the `log::info!`/`log::warn!` call sites used throughout
/// the pool/runner/session layers.
pub fn init() {
    if let Err(e) = fs::create_dir_all(LOG_DIR) {
        eprintln!("Failed to create log directory at '{}': {}", LOG_DIR, e);
    }

    let log_file_path = format!("{}/{}", LOG_DIR, LOG_FILE);

    let log_level = std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string());
    let log_level_filter = log_level.parse::<LevelFilter>().unwrap_or(LevelFilter::Info);

    let base_config = Dispatch::new()
        .level(log_level_filter)
        .level_for("serde", LevelFilter::Warn)
        .level_for("uuid", LevelFilter::Warn)
        .level_for("actix_web", LevelFilter::Warn)
        .level_for("mio", LevelFilter::Warn);

    let console_config = Dispatch::new()
        .format(|out, message, record| {
            let colors = fern::colors::ColoredLevelConfig::new()
                .error(fern::colors::Color::Red)
                .warn(fern::colors::Color::Yellow)
                .info(fern::colors::Color::Green)
                .debug(fern::colors::Color::Blue)
                .trace(fern::colors::Color::BrightBlack);

            out.finish(format_args!(
                "[{} {} {}] {}",
                Local::now().format("%Y-%m-%d %H:%M:%S"),
                colors.color(record.level()),
                record.target(),
                message
            ))
        })
        .chain(std::io::stderr());

    let file_config = Dispatch::new()
        .format(|out, message, record| {
            out.finish(format_args!("[{} {} {}] {}", Local::now().format("%Y-%m-%d %H:%M:%S"), record.level(), record.target(), message))
        })
        .chain(fern::log_file(&log_file_path).unwrap_or_else(|e| {
            eprintln!("Failed to open log file '{}': {}", log_file_path, e);
            fern::log_file("/dev/stderr").expect("Failed to open stderr as fallback")
        }));

    base_config
        .chain(console_config)
        .chain(file_config)
        .apply()
        .unwrap_or_else(|e| {
            eprintln!("Failed to apply logger configuration: {}", e);
        });

    // Route `tracing` events through the same `log` facade so both macro
    // families end up in the fern dispatcher above. Safe to call once; a
    // second call in test setup is tolerated.
    let _ = LogTracer::init();

    log::info!("Logger initialized. Logging to console and '{}'.", log_file_path);
}
