//! Sample-rate conversion using rubato
//!
//! Converts decoded blocks to the negotiated output rate when the device
//! could not be opened at the source rate. Runs on the decode side only;
//! the realtime callback never resamples.

use crate::error::{Error, Result};
use rubato::{FastFixedIn, PolynomialDegree, Resampler as RubatoResampler};
use tracing::trace;

/// One-shot block resampler.
///
/// Each decoded block is converted independently. Blocks are long enough
/// (hundreds to thousands of frames) that boundary effects sit well below
/// audibility, and the conversion is already a declared departure from
/// bit-exactness.
pub struct Resampler;

impl Resampler {
    /// Resample interleaved audio from `input_rate` to `output_rate`.
    ///
    /// Returns the input unchanged (same values, new allocation avoided)
    /// when the rates already match.
    pub fn resample(
        input: Vec<f32>,
        input_rate: u32,
        output_rate: u32,
        channels: u16,
    ) -> Result<Vec<f32>> {
        if input_rate == output_rate {
            return Ok(input);
        }
        if input.is_empty() {
            return Ok(input);
        }

        let planar_input = Self::deinterleave(&input, channels);
        let input_frames = planar_input[0].len();

        let mut resampler = FastFixedIn::<f32>::new(
            output_rate as f64 / input_rate as f64,
            1.0,
            PolynomialDegree::Septic,
            input_frames,
            channels as usize,
        )
        .map_err(|e| Error::Decode(format!("Failed to create resampler: {}", e)))?;

        let planar_output = resampler
            .process(&planar_input, None)
            .map_err(|e| Error::Decode(format!("Resampling failed: {}", e)))?;

        let output = Self::interleave(planar_output);

        trace!(
            "Resampled {} frames @ {} Hz to {} frames @ {} Hz",
            input_frames,
            input_rate,
            output.len() / channels as usize,
            output_rate
        );

        Ok(output)
    }

    /// Split interleaved samples into per-channel planes (rubato format).
    fn deinterleave(input: &[f32], channels: u16) -> Vec<Vec<f32>> {
        let channels = channels as usize;
        let frames = input.len() / channels;
        let mut planes = vec![Vec::with_capacity(frames); channels];

        for frame in input.chunks_exact(channels) {
            for (ch, &sample) in frame.iter().enumerate() {
                planes[ch].push(sample);
            }
        }

        planes
    }

    /// Merge per-channel planes back into interleaved samples.
    fn interleave(planes: Vec<Vec<f32>>) -> Vec<f32> {
        let channels = planes.len();
        let frames = planes.first().map(|p| p.len()).unwrap_or(0);
        let mut output = Vec::with_capacity(frames * channels);

        for i in 0..frames {
            for plane in &planes {
                output.push(plane[i]);
            }
        }

        output
    }
}
