pub mod decode;
pub mod frames;

pub use decode::{decode_audio, AudioData};
pub use frames::{Frame, SpectrumFrames};
