//! Audio I/O: decoding, sample-rate conversion, and output devices.

pub mod decoder;
pub mod output;
pub mod resampler;
pub mod types;

pub use decoder::{AudioDecoder, DecodeStep, SymphoniaMetadata};
pub use output::{CpalBackend, OutputBackend, OutputCallback};
pub use types::{
    AudioDeviceInfo, DeviceCapabilities, MetadataSource, OutputPlan, StreamSpec, TrackInfo,
};
