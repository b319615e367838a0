pub mod config;
pub mod logging;
pub mod refresh;
pub mod render;
pub mod source;
