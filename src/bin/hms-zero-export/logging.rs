use std::io::Write;

use chrono::Local;
use env_logger::{Builder, Env};

/// `RUST_LOG` wins over the level picked in the config.
pub fn init_logger(debug: bool) {
    let level = if debug { "debug" } else { "info" };

    Builder::from_env(Env::default().default_filter_or(level))
        .format(|buf, record| {
            writeln!(
                buf,
                "{} [{}] - {}",
                Local::now().format("%Y-%m-%dT%H:%M:%S"),
                record.level(),
                record.args()
            )
        })
        .init();
}
