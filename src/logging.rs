//! Logging setup
//! Installs `env_logger` with local timestamps. `RUST_LOG` overrides the given level.

use std::io::Write;

use chrono::Local;
use log::LevelFilter;

pub fn init(level: LevelFilter) {
    let result = env_logger::Builder::new()
        .filter_level(level)
        .parse_default_env()
        .format(|buf, record| {
            writeln!(
                buf,
                "{} [{}] {}: {}",
                Local::now().format("%Y-%m-%dT%H:%M:%S%.3f"),
                record.level(),
                record.target(),
                record.args()
            )
        })
        .try_init();

    if result.is_ok() {
        log::info!("Logging initialized");
    }
}
