//! Per-track decoder worker
//!
//! One worker thread per actively decoding track. Decodes PCM at the
//! source's native format, runs the DSP chain, resamples to the negotiated
//! output rate when required, and pushes into the ring buffer with
//! backpressure (yield, never drop). Cancellation, pause, and seek are all
//! cooperative flags checked between decode iterations, so the worker
//! never leaves partial state behind.
//!
//! Gapless handoff: when a next track is queued, the worker holds back the
//! trailing crossfade window of the outgoing track, pre-decodes the
//! incoming track's lead, and mixes the two with equal-power curves before
//! pushing, so the buffered stream crosses the boundary with no inserted
//! silence.

use crate::audio::decoder::{AudioDecoder, DecodeStep};
use crate::audio::resampler::Resampler;
use crate::audio::types::{OutputPlan, TrackInfo};
use crate::dsp::DspChain;
use crate::playback::fade::{equal_power_gains, FadeMachine};
use crate::playback::ring_buffer::SampleRing;
use crate::playback::state::SharedState;
use crossbeam_channel::Sender;
use parking_lot::Mutex;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Pause between retries when the ring buffer is full
const BACKPRESSURE_SLEEP: Duration = Duration::from_millis(5);

/// Pause while the worker itself is paused
const PAUSE_SLEEP: Duration = Duration::from_millis(10);

/// Minimum free ring space before decoding another block (samples)
const DECODE_HEADROOM: usize = 8192;

/// Crossfade mixing block size in frames (progress advances per block)
const MIX_BLOCK_FRAMES: usize = 512;

/// Events the worker reports back to the engine loop.
#[derive(Debug)]
pub enum WorkerEvent {
    /// The queued next track took over at a gapless boundary
    GaplessStarted { path: PathBuf, info: TrackInfo },

    /// The last track ended and the buffer has drained
    TrackFinished { path: PathBuf },

    /// A stream-fatal decode error ended the track early
    TrackFailed { path: PathBuf, message: String },
}

/// Everything the worker thread shares with the engine.
pub struct WorkerContext {
    pub ring: Arc<SampleRing>,
    pub dsp: Arc<Mutex<DspChain>>,
    pub fade: Arc<Mutex<FadeMachine>>,
    pub shared: Arc<SharedState>,
    pub events: Sender<WorkerEvent>,
    pub plan: OutputPlan,
    /// Crossfade window length in frames at the output rate
    pub crossfade_frames: u64,
}

/// Handle to a running decoder worker. All control is cooperative: the
/// thread polls these flags between decode iterations and exits cleanly.
pub struct DecoderWorker {
    stop: Arc<AtomicBool>,
    pause: Arc<AtomicBool>,
    seek_request: Arc<Mutex<Option<f64>>>,
    seek_pending: Arc<AtomicBool>,
    next_track: Arc<Mutex<Option<(PathBuf, TrackInfo)>>>,
    skipped_packets: Arc<AtomicU64>,
    thread: Option<thread::JoinHandle<()>>,
}

impl DecoderWorker {
    /// Spawn a worker for a freshly opened track.
    pub fn spawn(path: PathBuf, info: TrackInfo, ctx: WorkerContext) -> crate::error::Result<Self> {
        let stop = Arc::new(AtomicBool::new(false));
        let pause = Arc::new(AtomicBool::new(false));
        let seek_request = Arc::new(Mutex::new(None));
        let seek_pending = Arc::new(AtomicBool::new(false));
        let next_track = Arc::new(Mutex::new(None));
        let skipped_packets = Arc::new(AtomicU64::new(0));

        let flags = WorkerFlags {
            stop: Arc::clone(&stop),
            pause: Arc::clone(&pause),
            seek_request: Arc::clone(&seek_request),
            seek_pending: Arc::clone(&seek_pending),
            next_track: Arc::clone(&next_track),
            skipped_packets: Arc::clone(&skipped_packets),
        };

        let thread = thread::Builder::new()
            .name("decoder-worker".into())
            .spawn(move || run_worker(path, info, ctx, flags))?;

        Ok(Self {
            stop,
            pause,
            seek_request,
            seek_pending,
            next_track,
            skipped_packets,
            thread: Some(thread),
        })
    }

    /// Signal cooperative shutdown and join.
    pub fn stop(mut self) {
        self.stop.store(true, Ordering::Release);
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }

    pub fn set_paused(&self, paused: bool) {
        self.pause.store(paused, Ordering::Release);
    }

    /// Ask the worker to restart decoding at `position_secs`. Returns once
    /// the request is registered; completion is observed via
    /// [`seek_pending`](Self::seek_pending).
    pub fn request_seek(&self, position_secs: f64) {
        *self.seek_request.lock() = Some(position_secs.max(0.0));
        self.seek_pending.store(true, Ordering::Release);
    }

    /// True while a requested seek has not yet been performed.
    pub fn seek_pending(&self) -> bool {
        self.seek_pending.load(Ordering::Acquire)
    }

    /// Queue the next track for gapless continuation.
    pub fn queue_next(&self, path: PathBuf, info: TrackInfo) {
        *self.next_track.lock() = Some((path, info));
    }

    /// Take back a queued track the worker never consumed. Non-empty when
    /// the queue request arrived after the worker passed end of stream.
    pub fn take_queued(&self) -> Option<(PathBuf, TrackInfo)> {
        self.next_track.lock().take()
    }

    /// Packets skipped due to malformed data.
    pub fn skipped_packets(&self) -> u64 {
        self.skipped_packets.load(Ordering::Relaxed)
    }
}

impl Drop for DecoderWorker {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::Release);
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

/// Control flags handed to the worker thread.
struct WorkerFlags {
    stop: Arc<AtomicBool>,
    pause: Arc<AtomicBool>,
    seek_request: Arc<Mutex<Option<f64>>>,
    seek_pending: Arc<AtomicBool>,
    next_track: Arc<Mutex<Option<(PathBuf, TrackInfo)>>>,
    skipped_packets: Arc<AtomicU64>,
}

impl WorkerFlags {
    fn stopped(&self) -> bool {
        self.stop.load(Ordering::Acquire)
    }

    fn seek_requested(&self) -> bool {
        self.seek_pending.load(Ordering::Acquire)
    }
}

fn run_worker(path: PathBuf, info: TrackInfo, ctx: WorkerContext, flags: WorkerFlags) {
    let mut decoder = match AudioDecoder::open(&path) {
        Ok(d) => d,
        Err(e) => {
            // Play probes before spawning, so this is rare (file vanished
            // or changed underneath us)
            error!("Worker failed to open {}: {}", path.display(), e);
            let _ = ctx.events.send(WorkerEvent::TrackFailed {
                path,
                message: e.to_string(),
            });
            return;
        }
    };

    let mut current_path = path;
    let mut spec = info.spec;
    let mut frames_decoded: u64 = 0;

    // Holdback window for gapless crossfading, in output-format samples
    let crossfade_samples = ctx.crossfade_frames as usize * ctx.plan.channels as usize;
    let mut tail: Vec<f32> = Vec::with_capacity(crossfade_samples);

    debug!(
        "Decoder worker started for {} ({} Hz / {} ch)",
        current_path.display(),
        spec.sample_rate,
        spec.channels
    );

    loop {
        if flags.stopped() {
            debug!("Decoder worker stopping cooperatively");
            return;
        }

        // Cooperative seek: restart decode at the requested timestamp. The
        // engine clears the ring once seek_pending drops, so stale audio is
        // never served.
        let request = flags.seek_request.lock().take();
        if let Some(position) = request {
            tail.clear();
            match decoder.seek(position) {
                Ok(()) => {
                    frames_decoded = (position * spec.sample_rate as f64) as u64;
                    ctx.shared.set_position_ms((position * 1000.0) as u64);
                }
                Err(e) => warn!("Seek to {:.2}s failed: {}", position, e),
            }
            flags.seek_pending.store(false, Ordering::Release);
            continue;
        }

        if flags.pause.load(Ordering::Acquire) {
            thread::sleep(PAUSE_SLEEP);
            continue;
        }

        // Backpressure: wait for the consumer instead of dropping frames
        if ctx.ring.available_write() < DECODE_HEADROOM {
            thread::sleep(BACKPRESSURE_SLEEP);
            continue;
        }

        match decoder.next_block() {
            Ok(DecodeStep::Block(mut samples)) => {
                frames_decoded += (samples.len() / spec.channels as usize) as u64;
                ctx.shared
                    .set_position_ms(frames_decoded * 1000 / spec.sample_rate as u64);
                flags
                    .skipped_packets
                    .store(decoder.skipped_packets(), Ordering::Relaxed);

                match prepare_block(samples, &spec, &ctx) {
                    Ok(block) => samples = block,
                    Err(e) => {
                        warn!("Dropping block after processing error: {}", e);
                        continue;
                    }
                }

                // Hold back the trailing crossfade window; push the rest
                tail.extend_from_slice(&samples);
                if tail.len() > crossfade_samples {
                    let release = tail.len() - crossfade_samples;
                    if !push_all(&ctx.ring, &flags, &tail[..release]) {
                        return;
                    }
                    tail.drain(..release);
                }
            }

            Ok(DecodeStep::EndOfStream) => {
                let queued = flags.next_track.lock().take();
                match queued {
                    Some((next_path, next_info)) => {
                        match begin_gapless(&next_path, &next_info, &mut tail, &ctx, &flags) {
                            Ok(next_decoder) => {
                                info!(
                                    "Gapless transition: {} -> {}",
                                    current_path.display(),
                                    next_path.display()
                                );
                                let _ = ctx.events.send(WorkerEvent::GaplessStarted {
                                    path: next_path.clone(),
                                    info: next_info.clone(),
                                });
                                decoder = next_decoder;
                                spec = next_info.spec;
                                frames_decoded = 0;
                                current_path = next_path;
                            }
                            Err(e) => {
                                warn!(
                                    "Gapless continuation to {} failed: {}",
                                    next_path.display(),
                                    e
                                );
                                finish_track(&mut tail, &ctx, &flags, current_path);
                                return;
                            }
                        }
                    }
                    None => {
                        finish_track(&mut tail, &ctx, &flags, current_path);
                        return;
                    }
                }
            }

            Err(e) => {
                error!("Stream-fatal decode error: {}", e);
                // Salvage whatever was held back, then report early end
                let _ = push_all(&ctx.ring, &flags, &tail);
                let _ = ctx.events.send(WorkerEvent::TrackFailed {
                    path: current_path,
                    message: e.to_string(),
                });
                return;
            }
        }
    }
}

/// DSP, resampling, and channel remapping for one decoded block.
fn prepare_block(
    mut samples: Vec<f32>,
    spec: &crate::audio::types::StreamSpec,
    ctx: &WorkerContext,
) -> crate::error::Result<Vec<f32>> {
    ctx.dsp.lock().process(&mut samples);

    // Keyed off the actual rates, not the plan flag, so a gapless next
    // track at a different rate still lands on the open stream's rate
    if spec.sample_rate != ctx.plan.sample_rate {
        samples = Resampler::resample(
            samples,
            spec.sample_rate,
            ctx.plan.sample_rate,
            spec.channels,
        )?;
    }

    if spec.channels != ctx.plan.channels {
        samples = remap_channels(&samples, spec.channels, ctx.plan.channels);
    }

    Ok(samples)
}

/// Map between channel layouts: mono is duplicated, extra channels are
/// dropped, missing channels are zero-filled.
fn remap_channels(input: &[f32], from: u16, to: u16) -> Vec<f32> {
    let from = from.max(1) as usize;
    let to = to.max(1) as usize;
    if from == to {
        return input.to_vec();
    }

    let frames = input.len() / from;
    let mut output = Vec::with_capacity(frames * to);

    for frame in input.chunks_exact(from) {
        if from == 1 {
            for _ in 0..to {
                output.push(frame[0]);
            }
        } else {
            for ch in 0..to {
                output.push(frame.get(ch).copied().unwrap_or(0.0));
            }
        }
    }

    output
}

/// Push every sample, yielding while the ring is full. Returns false when
/// interrupted by stop or a pending seek (the caller abandons the data).
fn push_all(ring: &SampleRing, flags: &WorkerFlags, data: &[f32]) -> bool {
    let mut written = 0;
    while written < data.len() {
        if flags.stopped() || flags.seek_requested() {
            return false;
        }
        let n = ring.write(&data[written..]);
        written += n;
        if n == 0 {
            thread::sleep(BACKPRESSURE_SLEEP);
        }
    }
    true
}

/// Open the next track, pre-decode its lead, and crossfade it with the
/// held-back tail of the outgoing track. On success the held-back window
/// has been pushed (mixed) and the returned decoder continues the stream.
fn begin_gapless(
    next_path: &PathBuf,
    next_info: &TrackInfo,
    tail: &mut Vec<f32>,
    ctx: &WorkerContext,
    flags: &WorkerFlags,
) -> crate::error::Result<AudioDecoder> {
    let mut next_decoder = AudioDecoder::open(next_path)?;

    // Re-arm the chain for the incoming track before its blocks pass
    // through it
    ctx.dsp
        .lock()
        .prepare_for_track(&next_info.spec, next_info.replaygain.clone());

    // Pre-decode the incoming lead until it covers the outgoing tail
    let mut lead: Vec<f32> = Vec::with_capacity(tail.len());
    while lead.len() < tail.len() {
        if flags.stopped() {
            return Err(crate::Error::InvalidState("worker stopped".into()));
        }
        match next_decoder.next_block()? {
            DecodeStep::Block(samples) => {
                let block = prepare_block(samples, &next_info.spec, ctx)?;
                lead.extend_from_slice(&block);
            }
            DecodeStep::EndOfStream => break,
        }
    }

    let channels = ctx.plan.channels as usize;
    let window_frames = (tail.len() / channels).min(lead.len() / channels);
    let window_samples = window_frames * channels;

    ctx.fade.lock().begin_crossfade(window_frames as u64);

    // Equal-power mix over the window, advancing the fade machine per
    // mixing block
    let mut mixed = Vec::with_capacity(window_samples.max(tail.len()) + lead.len());
    for block_start in (0..window_frames).step_by(MIX_BLOCK_FRAMES) {
        let block_end = (block_start + MIX_BLOCK_FRAMES).min(window_frames);
        for frame in block_start..block_end {
            let t = frame as f32 / window_frames.max(1) as f32;
            let (gain_in, gain_out) = equal_power_gains(t);
            for ch in 0..channels {
                let i = frame * channels + ch;
                mixed.push(tail[i] * gain_out + lead[i] * gain_in);
            }
        }
        ctx.fade.lock().advance((block_end - block_start) as u64);
    }

    // Anything the window did not cover follows unmixed: first leftover
    // outgoing tail (short lead), then leftover incoming lead
    mixed.extend_from_slice(&tail[window_samples..]);
    mixed.extend_from_slice(&lead[window_samples..]);
    tail.clear();

    if !push_all(&ctx.ring, flags, &mixed) {
        return Err(crate::Error::InvalidState("worker interrupted".into()));
    }

    // The machine may not have reached Idle if the window was cut short
    let mut fade = ctx.fade.lock();
    if !fade.is_idle() {
        fade.advance(u64::MAX / 2);
    }

    Ok(next_decoder)
}

/// Flush held-back samples, wait for the buffer to drain, and report the
/// track as finished.
fn finish_track(tail: &mut Vec<f32>, ctx: &WorkerContext, flags: &WorkerFlags, path: PathBuf) {
    if !push_all(&ctx.ring, flags, tail) {
        return;
    }
    tail.clear();

    // Let the consumer drain what we produced before announcing the end
    while !ctx.ring.is_empty() {
        if flags.stopped() {
            return;
        }
        thread::sleep(Duration::from_millis(20));
    }

    debug!("Track finished: {}", path.display());
    let _ = ctx.events.send(WorkerEvent::TrackFinished { path });
}
