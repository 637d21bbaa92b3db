//! Table modules - each adds `impl Database` blocks for one table.

pub(crate) mod app_config; // app_config
pub(crate) mod feeds; // feeds
pub(crate) mod session_cache; // session_cache
pub(crate) mod settings; // settings
pub(crate) mod ui_state; // ui_state
