//! Reproduction-path diagnostics
//!
//! Two verification tools: a live report of the current path (buffer
//! health, dropout counter, negotiated format, and the bit-perfect
//! verdict), and an offline null test that decodes a file twice and
//! compares every sample, confirming the decode stage is deterministic.
//!
//! The bit-perfect claim is deliberately conservative: it holds only when
//! every stage that could alter samples is provably inactive. Any doubt
//! reports false.

use crate::audio::decoder::{AudioDecoder, DecodeStep};
use crate::audio::types::OutputPlan;
use crate::dsp::DspChain;
use crate::error::Result;
use crate::playback::ring_buffer::SampleRing;
use serde::Serialize;
use std::path::Path;
use tracing::{debug, info};

/// Live snapshot of the reproduction path.
#[derive(Debug, Clone, Serialize)]
pub struct AudioDiagnostics {
    /// Ring capacity in samples
    pub buffer_capacity: usize,
    /// Samples currently buffered
    pub buffer_filled: usize,
    /// Fill level in percent
    pub fill_pct: f32,
    /// Buffered audio ahead of the device, in milliseconds
    pub latency_ms: f32,
    /// Underruns observed while playback was active
    pub dropout_count: u64,
    /// Rate the output stream runs at (0 when no stream is open)
    pub output_sample_rate: u32,
    pub output_channels: u16,
    /// Hardware-direct path
    pub exclusive: bool,
    /// Routed through the system mixer
    pub shared_mode: bool,
    /// Rate conversion or channel remapping in effect
    pub resampled: bool,
    /// True only when the entire path provably passes samples unaltered
    pub is_bit_perfect: bool,
}

impl AudioDiagnostics {
    /// Assemble a report from the live components.
    pub fn collect(
        ring: &SampleRing,
        plan: Option<&OutputPlan>,
        dsp: &DspChain,
        volume: f32,
    ) -> Self {
        let buffer_filled = ring.len();

        let (output_sample_rate, output_channels, exclusive, shared_mode, resampled) = match plan {
            Some(p) => (p.sample_rate, p.channels, p.exclusive, p.shared_mode, p.resampled),
            None => (0, 0, false, false, false),
        };

        let latency_ms = if output_sample_rate > 0 && output_channels > 0 {
            let frames = buffer_filled / output_channels as usize;
            frames as f32 * 1000.0 / output_sample_rate as f32
        } else {
            0.0
        };

        // Every condition must hold; an absent stream can never be
        // bit-perfect
        let is_bit_perfect = plan.is_some()
            && exclusive
            && !resampled
            && dsp.is_transparent()
            && volume == 1.0;

        Self {
            buffer_capacity: ring.capacity(),
            buffer_filled,
            fill_pct: ring.fill_pct(),
            latency_ms,
            dropout_count: ring.dropouts(),
            output_sample_rate,
            output_channels,
            exclusive,
            shared_mode,
            resampled,
            is_bit_perfect,
        }
    }
}

/// Outcome of an offline null test on one file.
#[derive(Debug, Clone, Serialize)]
pub struct NullTestResult {
    pub passed: bool,
    pub total_samples: u64,
    /// Samples that differed between the two decodes
    pub diff_samples: u64,
    /// Largest absolute difference observed
    pub max_diff: f32,
    /// Root-mean-square of per-sample differences
    pub rms_diff: f64,
    /// The two decodes produced different sample counts
    pub length_mismatch: bool,
    /// Human-readable verdict
    pub summary: String,
}

/// Decode `path` twice and compare the two PCM streams sample by sample.
///
/// A correct decode stage is deterministic, so any difference means
/// nondeterminism or data-dependent corruption somewhere in the decode
/// path. Passing requires identical length and zero differing samples.
pub fn run_null_test(path: &Path) -> Result<NullTestResult> {
    info!("Null test: decoding {} twice", path.display());

    let first = decode_all(path)?;
    let second = decode_all(path)?;

    let length_mismatch = first.len() != second.len();
    let compared = first.len().min(second.len());

    let mut diff_samples = 0u64;
    let mut max_diff = 0.0f32;
    let mut sq_sum = 0.0f64;
    for (&a, &b) in first.iter().zip(second.iter()) {
        let diff = (a - b).abs();
        if diff > 0.0 {
            diff_samples += 1;
            max_diff = max_diff.max(diff);
        }
        sq_sum += (diff as f64) * (diff as f64);
    }

    let rms_diff = if compared > 0 {
        (sq_sum / compared as f64).sqrt()
    } else {
        0.0
    };

    let passed = !length_mismatch && diff_samples == 0;
    let summary = if passed {
        format!("{} samples compared, all identical", compared)
    } else if length_mismatch {
        format!(
            "decode lengths differ ({} vs {} samples)",
            first.len(),
            second.len()
        )
    } else {
        format!(
            "{} of {} samples differ (max {}, rms {:.3e})",
            diff_samples, compared, max_diff, rms_diff
        )
    };
    debug!("Null test: {}", summary);

    Ok(NullTestResult {
        passed,
        total_samples: compared as u64,
        diff_samples,
        max_diff,
        rms_diff,
        length_mismatch,
        summary,
    })
}

/// Decode an entire file into interleaved f32 PCM.
fn decode_all(path: &Path) -> Result<Vec<f32>> {
    let mut decoder = AudioDecoder::open(path)?;
    let mut samples = Vec::new();

    loop {
        match decoder.next_block()? {
            DecodeStep::Block(block) => samples.extend_from_slice(&block),
            DecodeStep::EndOfStream => break,
        }
    }

    Ok(samples)
}
