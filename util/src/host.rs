//! Host platform utility functions

use std::{env, path::PathBuf};

/// Environment variable pointing at the root of the software checkout, which holds the `params`
/// directory and receives the `sessions` directory.
pub const SW_ROOT_ENV_VAR: &str = "GBP_SW_ROOT";

/// Retrieve the software root directory from the environment.
pub fn get_sw_root() -> Result<PathBuf, env::VarError> {
    env::var(SW_ROOT_ENV_VAR).map(PathBuf::from)
}
