use log::LevelFilter;

/// Sets the behavior of the logger, based on passed environment variables
/// such as `RUST_LOG`.
pub fn setup_logging(debug: bool) {
    let mut builder = env_logger::Builder::default();
    builder.filter_level(if debug {
        LevelFilter::Debug
    } else {
        LevelFilter::Info
    });

    if debug {
        builder.format_timestamp_millis();
    }

    // Overwrite the defaults from env
    builder.parse_default_env();
    builder.init();
}
