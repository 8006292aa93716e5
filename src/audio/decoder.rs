//! Audio decoding using symphonia
//!
//! Wraps a symphonia format reader + codec decoder as a source of
//! successive interleaved f32 PCM blocks at the track's native format.
//! Per-packet decode errors are skipped and counted; only stream-fatal
//! conditions terminate decoding.

use crate::audio::types::{MetadataSource, StreamSpec, TrackInfo};
use crate::dsp::replaygain::ReplayGainInfo;
use crate::error::{Error, Result};
use std::fs::File;
use std::path::Path;
use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::{Decoder, DecoderOptions, CODEC_TYPE_NULL};
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::{FormatOptions, FormatReader, SeekMode, SeekTo};
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;
use symphonia::core::units::Time;
use tracing::{debug, warn};

/// Outcome of one decode step.
pub enum DecodeStep {
    /// One block of interleaved f32 samples at the source format
    Block(Vec<f32>),

    /// The stream ended normally
    EndOfStream,
}

/// Streaming audio decoder for one track.
pub struct AudioDecoder {
    format: Box<dyn FormatReader>,
    decoder: Box<dyn Decoder>,
    track_id: u32,
    spec: StreamSpec,
    duration_secs: f64,
    /// Packets that failed to decode and were skipped
    skipped_packets: u64,
}

impl AudioDecoder {
    /// Open a file for decoding.
    ///
    /// # Errors
    /// [`Error::UnsupportedFormat`] when the container/codec cannot be
    /// probed or no decoder exists for it; [`Error::Io`] when the file
    /// cannot be opened.
    pub fn open(path: &Path) -> Result<Self> {
        let file = File::open(path)?;
        let mss = MediaSourceStream::new(Box::new(file), Default::default());

        let mut hint = Hint::new();
        if let Some(ext) = path.extension().and_then(|e| e.to_str()) {
            hint.with_extension(ext);
        }

        let meta_opts = MetadataOptions::default();
        let fmt_opts = FormatOptions {
            enable_gapless: true,
            ..Default::default()
        };

        let probed = symphonia::default::get_probe()
            .format(&hint, mss, &fmt_opts, &meta_opts)
            .map_err(|e| {
                Error::UnsupportedFormat(format!("{}: {}", path.display(), e))
            })?;

        let format = probed.format;

        let track = format
            .tracks()
            .iter()
            .find(|t| t.codec_params.codec != CODEC_TYPE_NULL)
            .ok_or_else(|| {
                Error::UnsupportedFormat(format!("{}: no audio track found", path.display()))
            })?;

        let track_id = track.id;
        let codec_params = &track.codec_params;

        let sample_rate = codec_params.sample_rate.ok_or_else(|| {
            Error::UnsupportedFormat(format!("{}: sample rate not reported", path.display()))
        })?;
        let channels = codec_params
            .channels
            .map(|c| c.count() as u16)
            .ok_or_else(|| {
                Error::UnsupportedFormat(format!("{}: channel layout not reported", path.display()))
            })?;

        let spec = StreamSpec {
            sample_rate,
            channels,
            bits_per_sample: codec_params.bits_per_sample,
        };

        let duration_secs = codec_params
            .n_frames
            .map(|n| n as f64 / sample_rate as f64)
            .unwrap_or(0.0);

        let decoder = symphonia::default::get_codecs()
            .make(codec_params, &DecoderOptions::default())
            .map_err(|e| {
                Error::UnsupportedFormat(format!("{}: no decoder available: {}", path.display(), e))
            })?;

        debug!(
            "Opened {}: {} Hz, {} ch, {:?} bit, {:.1}s",
            path.display(),
            spec.sample_rate,
            spec.channels,
            spec.bits_per_sample,
            duration_secs
        );

        Ok(Self {
            format,
            decoder,
            track_id,
            spec,
            duration_secs,
            skipped_packets: 0,
        })
    }

    /// Source stream format.
    pub fn spec(&self) -> StreamSpec {
        self.spec
    }

    /// Track duration in seconds (0.0 if unknown).
    pub fn duration_secs(&self) -> f64 {
        self.duration_secs
    }

    /// Packets skipped due to malformed data so far.
    pub fn skipped_packets(&self) -> u64 {
        self.skipped_packets
    }

    /// Decode the next block of interleaved f32 samples.
    ///
    /// Malformed packets are skipped and counted. Returns
    /// `DecodeStep::EndOfStream` at the natural end; any other error is
    /// stream-fatal.
    pub fn next_block(&mut self) -> Result<DecodeStep> {
        loop {
            let packet = match self.format.next_packet() {
                Ok(p) => p,
                Err(SymphoniaError::IoError(ref e))
                    if e.kind() == std::io::ErrorKind::UnexpectedEof =>
                {
                    return Ok(DecodeStep::EndOfStream);
                }
                Err(e) => return Err(Error::Decode(format!("{}", e))),
            };

            if packet.track_id() != self.track_id {
                continue;
            }

            let decoded = match self.decoder.decode(&packet) {
                Ok(d) => d,
                Err(SymphoniaError::DecodeError(e)) => {
                    self.skipped_packets += 1;
                    warn!("Skipping malformed packet: {}", e);
                    continue;
                }
                Err(e) => return Err(Error::Decode(format!("{}", e))),
            };

            let spec = *decoded.spec();
            let frames = decoded.frames();
            let mut sample_buf = SampleBuffer::<f32>::new(frames as u64, spec);
            sample_buf.copy_interleaved_ref(decoded);

            return Ok(DecodeStep::Block(sample_buf.samples().to_vec()));
        }
    }

    /// Seek to a position in seconds, resetting decoder state.
    pub fn seek(&mut self, position_secs: f64) -> Result<()> {
        let seek_to = SeekTo::Time {
            time: Time::new(
                position_secs as u64,
                position_secs.fract(),
            ),
            track_id: Some(self.track_id),
        };
        self.format
            .seek(SeekMode::Accurate, seek_to)
            .map_err(|e| Error::Decode(format!("Seek failed: {}", e)))?;
        self.decoder.reset();
        Ok(())
    }
}

/// Default [`MetadataSource`] backed by symphonia codec parameters.
///
/// Reports duration and native format only; ReplayGain values are left
/// empty since tag reading belongs to an outer collaborator.
pub struct SymphoniaMetadata;

impl MetadataSource for SymphoniaMetadata {
    fn probe(&self, path: &Path) -> Result<TrackInfo> {
        let decoder = AudioDecoder::open(path)?;
        Ok(TrackInfo {
            duration_secs: decoder.duration_secs(),
            spec: decoder.spec(),
            replaygain: ReplayGainInfo::default(),
        })
    }
}
