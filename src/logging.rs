//! Logger setup for binaries.
//!
//! `RUST_LOG` always wins over the mode's default filter.

use std::io::Write;

use env_logger::{Builder, Env};

use crate::config::Mode;

pub fn init(mode: Mode) {
    let _ = builder(mode).try_init();
}

fn builder(mode: Mode) -> Builder {
    match mode {
        Mode::Development => {
            let mut builder = Builder::from_env(Env::default().default_filter_or("debug"));
            builder.format_module_path(true).format_timestamp_millis();
            builder
        }
        Mode::Production => {
            let mut builder = Builder::from_env(Env::default().default_filter_or("info"));
            builder.format(|buf, record| {
                writeln!(
                    buf,
                    "{} {:<5} {} {}",
                    buf.timestamp_millis(),
                    record.level(),
                    record.target(),
                    record.args()
                )
            });
            builder
        }
    }
}
