pub mod audio;
pub mod config;
pub mod decoder;
pub mod double_buffer;
pub mod params;
pub mod radio;
pub mod ring_buffer;
pub mod scrambler;
