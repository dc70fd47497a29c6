//! Configuration for the bridge: schema, discovery and loading.
//!
//! Supports TOML, YAML and JSON files with `${VAR}` environment substitution.

pub mod env_subst;
pub mod loader;
pub mod schema;

pub use {
    loader::{
        clear_config_dir, config_dir, discover_and_load, find_config_file, load_config,
        set_config_dir,
    },
    schema::{BridgeConfig, ClientConfig, GatewayConfig, OneOrMany, RestConfig},
};
