pub mod api;
pub mod config;
pub mod error;
pub mod groupcall;
pub mod media;
pub mod recording;
