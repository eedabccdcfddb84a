use env_logger::Env;
use std::io::Write;

/// Logger used by every subcommand. Stage progress prints to stdout; log
/// lines stay on stderr with a compact level-prefixed format.
pub fn init(level: Option<&str>) {
    let filter = level.unwrap_or("info");
    let _ = env_logger::Builder::from_env(Env::default().default_filter_or(filter))
        .format(|buf, record| writeln!(buf, "[{}] {}", record.level(), record.args()))
        .try_init();
}
