use tracing_subscriber::EnvFilter;

/// Install a `fmt` subscriber for hosts that don't bring their own.
///
/// `RUST_LOG` wins when set; otherwise verbosity 0, 1 and 2+ map to info,
/// debug and trace for this crate. Returns false if a global subscriber was
/// already installed.
pub fn init(verbosity: u8) -> bool {
    let level = match verbosity {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("lobby_schematics={}", level)));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .try_init()
        .is_ok()
}
