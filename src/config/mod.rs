//! Plan file loading and distributed settings.
mod apply;
mod loader;
mod parse;
pub mod types;


pub use apply::{RemoteSettings, remote_settings};
pub use loader::load_plan_file;
