// logger.rs — tracing-subscriber setup for the command-line tool.
//
// `RUST_LOG` wins when set; otherwise the crate logs at info, or at debug
// with `--verbose`.

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

pub fn init_cli_logger(verbose: bool) {
    let default = if verbose { "rawpipe=debug,info" } else { "rawpipe=info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));

    tracing_subscriber::registry()
        .with(filter)
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_thread_ids(false)
                .with_file(false)
                .with_line_number(false)
                .compact(),
        )
        .init();
}
