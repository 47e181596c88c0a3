pub mod constants;
pub mod directory;
pub mod event_log;
pub mod local_store;
pub mod presets;
pub mod remote_directory;
pub mod server_protocol;
pub mod server_utils;
pub mod session;
pub mod sync;
pub mod timer;
pub mod types;
pub mod vitals;
