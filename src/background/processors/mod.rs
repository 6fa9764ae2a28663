pub mod archive;
pub mod ffmpeg;
pub mod nona;
pub mod pyramid;
pub mod sampler;
