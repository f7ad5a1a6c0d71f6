//! Environment source: `MEDIAMGR__SECTION__KEY=value`

use config::builder::DefaultState;
use config::{ConfigBuilder, Environment};
use std::collections::HashMap;

pub const ENV_PREFIX: &str = "MEDIAMGR";

/// Add the environment overrides. `vars` replaces the process environment
/// when given.
pub fn add_to_builder(
    builder: ConfigBuilder<DefaultState>,
    vars: Option<HashMap<String, String>>,
) -> ConfigBuilder<DefaultState> {
    builder.add_source(
        Environment::with_prefix(ENV_PREFIX)
            .prefix_separator("__")
            .separator("__")
            .try_parsing(true)
            .source(vars),
    )
}
