//! Caller identity resolution for CLI commands.
//!
//! The resolution chain: `--as` flag > `WORKTRACK_IDENTITY` env > `USER` env (TTY only).
//! Mutating commands require an identity; read-only commands work without one.

use std::env;
use worktrack_core::{AccessError, Identity};

pub const IDENTITY_ENV: &str = "WORKTRACK_IDENTITY";

/// Environment reader trait for dependency injection in tests.
trait EnvReader {
    fn get(&self, key: &str) -> Option<String>;
    fn is_tty(&self) -> bool;
}

struct RealEnv;

impl EnvReader for RealEnv {
    fn get(&self, key: &str) -> Option<String> {
        env::var(key).ok().filter(|v| !v.is_empty())
    }

    fn is_tty(&self) -> bool {
        use std::io::IsTerminal;
        std::io::stdin().is_terminal()
    }
}

fn resolve_identity_with(cli_flag: Option<&str>, env: &dyn EnvReader) -> Option<String> {
    if let Some(flag) = cli_flag.filter(|f| !f.is_empty()) {
        return Some(flag.to_string());
    }

    if let Some(val) = env.get(IDENTITY_ENV) {
        return Some(val);
    }

    // USER is only trusted when a person is at the keyboard
    if env.is_tty() {
        return env.get("USER");
    }

    None
}

fn require_identity_with(
    cli_flag: Option<&str>,
    env: &dyn EnvReader,
) -> Result<Identity, AccessError> {
    resolve_identity_with(cli_flag, env).map_or_else(
        || {
            Err(AccessError::Unauthorized(format!(
                "no identity; pass --as <name> or set {IDENTITY_ENV}"
            )))
        },
        Identity::new,
    )
}

/// Resolve the caller identity for a mutating command.
///
/// # Errors
///
/// [`AccessError::Unauthorized`] when nothing in the chain yields a usable
/// identity, or the resolved value is blank or contains whitespace.
pub fn require_identity(cli_flag: Option<&str>) -> Result<Identity, AccessError> {
    require_identity_with(cli_flag, &RealEnv)
}
