pub mod loader;
pub mod schema;

pub use loader::{apply_env_overrides, get_config_path, load_config};
pub use schema::{AuthConfig, Config, GatewayConfig, SessionConfig};
