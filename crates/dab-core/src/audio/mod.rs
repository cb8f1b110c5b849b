pub mod frame;
pub mod pipeline;
pub mod resampler;
pub mod sink;
pub mod source;

pub use frame::Frame;
pub use pipeline::{AudioPipeline, AudioSink, MixCallback};
pub use sink::ThreadedAudioSink;
pub use source::AudioPipelineSource;
