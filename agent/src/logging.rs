use std::io::{self, IsTerminal as _};

use tracing::level_filters::LevelFilter;
use tracing_subscriber::{fmt, EnvFilter};

use crate::launch::Mode;

const ENV_NAME_COMMON: &str = "REMOTE_AGENT_LOG";
const ENV_NAME_ONE_SHOT: &str = "REMOTE_AGENT_CLI_LOG";
const ENV_NAME_SERVER: &str = "REMOTE_AGENT_SERVER_LOG";

fn istty() -> bool {
    io::stdout().is_terminal() && io::stderr().is_terminal()
}

fn default_filter() -> EnvFilter {
    EnvFilter::builder()
        .with_default_directive(LevelFilter::INFO.into())
        .parse_lossy("")
}

/// Creates env filter for the given run mode.
///
/// This function tries to read the most specific environment variable first, then falls back to
/// the common one ([`ENV_NAME_COMMON`]). A directive that fails to parse is reported on stderr and
/// otherwise skipped, since logging is not set up yet at this point.
fn env_filter(mode: Mode) -> EnvFilter {
    let specific_env_name = match mode {
        Mode::OneShot => ENV_NAME_ONE_SHOT,
        Mode::Server => ENV_NAME_SERVER,
    };

    return try_parse_env(specific_env_name)
        .or_else(|| try_parse_env(ENV_NAME_COMMON))
        .unwrap_or_else(default_filter);

    fn try_parse_env(var_name: &str) -> Option<EnvFilter> {
        let env = match std::env::var(var_name) {
            Ok(env) => env,
            Err(std::env::VarError::NotPresent) => return None,
            Err(std::env::VarError::NotUnicode(_)) => {
                eprintln!("Environment variable {} is not unicode, ignoring", var_name);
                return None;
            }
        };
        match EnvFilter::builder()
            .with_default_directive(LevelFilter::INFO.into())
            .parse(&env)
        {
            Ok(filter) => Some(filter),
            Err(err) => {
                eprintln!("Invalid log filter in {}: {}", var_name, err);
                None
            }
        }
    }
}

/// Installs the global subscriber.
///
/// One-shot commands print their own results on stdout, so their log goes to stderr.
pub fn init(mode: Mode) {
    let format = fmt::format()
        .with_level(true)
        .with_target(false)
        .with_thread_ids(false)
        .with_thread_names(false)
        .compact()
        .with_timer(fmt::time::SystemTime::default());
    let builder = fmt::Subscriber::builder()
        .with_env_filter(env_filter(mode))
        .with_ansi(istty())
        .event_format(format);

    let result = match mode {
        Mode::OneShot => tracing::subscriber::set_global_default(
            builder.with_writer(io::stderr).finish(),
        ),
        Mode::Server => tracing::subscriber::set_global_default(
            builder.with_writer(io::stdout).finish(),
        ),
    };
    if let Err(err) = result {
        eprintln!("Failed to set the log subscriber: {}", err);
    }
}
