pub mod batch;
pub mod catalog;
pub mod client;
pub mod config_loader;
pub mod controller;
pub mod credentials;
pub mod document;
pub mod error;
pub mod logging;
#[cfg(feature = "playback")]
pub mod playback;
pub mod request;
pub mod service;
pub mod writer;

pub use error::{Result, TtsError};
