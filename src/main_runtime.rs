use tracing_subscriber::EnvFilter;
use watchtower::config::LoggingConfig;

pub fn init_logging(logging: &LoggingConfig) {
    use tracing_subscriber::layer::SubscriberExt;
    use tracing_subscriber::util::SubscriberInitExt;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(format!("{},watchtower=debug", logging.level))
    });

    // File logging is opt-in through WATCHTOWER_LOG_DIR.
    //
    // `tracing_appender::rolling::daily` panics if it can't create the
    // initial file, so writability is checked first.
    let file_layer = match std::env::var("WATCHTOWER_LOG_DIR") {
        Ok(log_dir) => {
            let writable = std::fs::create_dir_all(&log_dir).is_ok() && {
                let probe = std::path::Path::new(&log_dir).join(".watchtower_write_test");
                let ok = std::fs::OpenOptions::new()
                    .create(true)
                    .append(true)
                    .open(&probe)
                    .is_ok();
                let _ = std::fs::remove_file(&probe);
                ok
            };

            if writable {
                let file_appender = tracing_appender::rolling::daily(&log_dir, "watchtower.log");
                let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);
                // The process logs until exit
                Box::leak(Box::new(guard));
                eprintln!("Logging to: {}/watchtower.log", log_dir);
                Some(
                    tracing_subscriber::fmt::layer()
                        .with_writer(non_blocking)
                        .with_ansi(false)
                        .with_target(true),
                )
            } else {
                eprintln!(
                    "Warning: Could not write to log directory {}, file logging disabled",
                    log_dir
                );
                None
            }
        }
        Err(_) => None,
    };

    let (json_layer, text_layer) = if logging.json {
        (Some(tracing_subscriber::fmt::layer().json().with_target(true)), None)
    } else {
        (
            None,
            Some(
                tracing_subscriber::fmt::layer()
                    .with_target(true)
                    .with_thread_ids(false)
                    .with_file(false)
                    .with_line_number(false),
            ),
        )
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(json_layer)
        .with(text_layer)
        .with(file_layer)
        .init();
}

pub fn init_logging_simple() {
    // Minimal logging for one-shot commands
    let _ = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::WARN)
        .try_init();
}
