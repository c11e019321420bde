pub mod analysis;
pub mod audio;
pub mod config;
pub mod display;
pub mod engine;
pub mod report;
pub mod synth;
pub mod tone;

pub use config::Config;
pub use engine::{Engine, TickObserver, TickReport};
