pub mod formats;

use flexi_logger::{Logger, LoggerHandle};

use crate::Error;

/// Start logging to stderr, filtered by `RUST_LOG` (default `info`). The
/// handle must be kept alive for the duration of the program.
pub fn init() -> Result<LoggerHandle, Error> {
    let handle = Logger::try_with_env_or_str("info")?
        .format(formats::cli_format)
        .log_to_stderr()
        .start()?;

    Ok(handle)
}
