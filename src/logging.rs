use crate::config::LoggingConfig;
use log::LevelFilter;
use log4rs::append::file::FileAppender;
use log4rs::config::{Appender, Config, Root};
use log4rs::encode::pattern::PatternEncoder;
use std::fs;
use std::sync::{Mutex, Once};

static INIT: Once = Once::new();
static INIT_RESULT: Mutex<Option<Result<(), String>>> = Mutex::new(None);

/// Sends all `log` output to the configured file. The terminal is owned by the
/// display, so nothing is ever logged to stdout or stderr.
pub fn setup_logging(settings: &LoggingConfig) -> Result<(), Box<dyn std::error::Error>> {
    INIT.call_once(|| {
        let result = (|| {
            // Create log directory if it doesn't exist
            if let Some(dir) = settings.log_file.parent() {
                if !dir.as_os_str().is_empty() {
                    fs::create_dir_all(dir)
                        .map_err(|e| format!("Failed to create log directory: {}", e))?;
                }
            }

            // Configure file appender
            let logfile = FileAppender::builder()
                .encoder(Box::new(PatternEncoder::new("{d(%Y-%m-%d %H:%M:%S)} - {l} - {m}{n}")))
                .append(true)
                .build(&settings.log_file)
                .map_err(|e| format!("Failed to create log file: {}", e))?;

            // Build configuration
            let config = Config::builder()
                .appender(Appender::builder().build("file", Box::new(logfile)))
                .build(Root::builder().appender("file").build(parse_level(&settings.log_level)))
                .map_err(|e| format!("Failed to build log config: {}", e))?;

            // Initialize logging
            log4rs::init_config(config).map_err(|e| format!("Logging initialization failed: {}", e))?;

            Ok(())
        })();

        // Store the result
        if let Ok(mut slot) = INIT_RESULT.lock() {
            *slot = Some(result);
        }
    });

    // Retrieve and return the result
    let guard = INIT_RESULT
        .lock()
        .map_err(|_| std::io::Error::new(std::io::ErrorKind::Other, "Logging state poisoned"))?;
    match guard.as_ref() {
        Some(Ok(())) => Ok(()),
        Some(Err(msg)) => Err(Box::new(std::io::Error::new(std::io::ErrorKind::Other, msg.clone()))),
        None => Err(Box::new(std::io::Error::new(std::io::ErrorKind::Other, "Logging not initialized"))),
    }
}

/// Unknown names fall back to `info`.
pub fn parse_level(level: &str) -> LevelFilter {
    match level.trim().to_ascii_lowercase().as_str() {
        "off" => LevelFilter::Off,
        "error" => LevelFilter::Error,
        "warn" | "warning" => LevelFilter::Warn,
        "debug" => LevelFilter::Debug,
        "trace" => LevelFilter::Trace,
        _ => LevelFilter::Info,
    }
}
