use log::SetLoggerError;

/// The filter used when `RUST_LOG` is not set: full-GC phase times from this crate, and
/// only warnings from everything else.
const DEFAULT_FILTER: &str = "warn,mmtk_g1=info";

/// Install `env_logger` as the global logger, unless the "builtin_env_logger" feature is
/// disabled. Fails if the embedding program installed a logger first.
///
/// Full-GC phases log at `info` and their per-worker steps at `debug`, so
/// `RUST_LOG=mmtk_g1=debug` shows the phase breakdown.
pub fn try_init() -> Result<(), SetLoggerError> {
    cfg_if::cfg_if! {
        if #[cfg(feature = "builtin_env_logger")] {
            env_logger::Builder::from_env(
                env_logger::Env::default().filter_or(env_logger::DEFAULT_FILTER_ENV, DEFAULT_FILTER),
            )
            .format_timestamp_millis()
            .try_init()
        } else {
            Ok(())
        }
    }
}
