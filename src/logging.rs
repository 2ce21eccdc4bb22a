//! Logging setup and the startup banner, grounded on the teacher's
//! `initialization::setup_logging` + `logging::print_banner`.

use colored::Colorize;
use std::io::Write;

/// Initializes the global logger. Call once at the top of `main`, before
/// anything else logs.
pub fn setup_logging() {
    env_logger::Builder::new()
        .filter_level(log::LevelFilter::Info)
        .parse_env("FLOCKER_LOG")
        .format(|buf, record| {
            writeln!(
                buf,
                "{} {}: {}",
                chrono::Utc::now().format("%Y-%m-%dT%H:%M:%S%.3fZ"),
                record.level(),
                record.args()
            )
        })
        .init();

    log::info!("{}", "logger initialized".green());
}

pub fn print_banner(title: &str, color: fn(&str) -> colored::ColoredString) {
    let border = "╔═══════════════════════════════════════════════════════════════╗";
    let bottom = "╚═══════════════════════════════════════════════════════════════╝";

    println!("{}", color(border));
    println!("{}", color(&format!("║{:^63}║", title)));
    println!("{}", color(bottom));
}
