//! Playback engine
//!
//! [`AudioEngine`] is the public handle: callers queue commands and read
//! state snapshots; the engine thread owns everything else. The thread
//! constructs its own output backend (audio streams are tied to the thread
//! that built them), runs the command loop, spawns one decoder worker per
//! track, and reacts to worker events for gapless continuation and
//! end-of-track teardown.
//!
//! Commands are processed strictly in order off a bounded queue. Probing a
//! file happens synchronously in the caller (`play` fails fast on an
//! unsupported format); everything after the probe is asynchronous.

use crate::audio::decoder::SymphoniaMetadata;
use crate::audio::output::{negotiate, select_device, CpalBackend, OutputBackend, OutputCallback};
use crate::audio::types::{MetadataSource, OutputPlan, StreamSpec, TrackInfo};
use crate::config::EngineConfig;
use crate::diagnostics::AudioDiagnostics;
use crate::dsp::DspChain;
use crate::error::{Error, Result};
use crate::playback::commands::PlaybackCommand;
use crate::playback::decoder_worker::{DecoderWorker, WorkerContext, WorkerEvent};
use crate::playback::fade::{FadeMachine, FadeState, GainRamp};
use crate::playback::ring_buffer::SampleRing;
use crate::playback::state::{PlaybackState, SharedState};
use crate::profiles::{DeviceProfile, JsonProfileStore, ProfileStore};
use crossbeam_channel::{bounded, unbounded, Receiver, RecvTimeoutError, Sender};
use parking_lot::Mutex;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

/// Command loop tick, also the worker event drain interval
const TICK: Duration = Duration::from_millis(50);

/// How long to wait for the ring to prime before arming dropout accounting
const PREFILL_TIMEOUT: Duration = Duration::from_millis(200);

/// Ring fill (in samples) considered primed for startup
const PREFILL_TARGET: usize = 16384;

/// How long to wait for the worker to acknowledge a seek
const SEEK_ACK_TIMEOUT: Duration = Duration::from_millis(500);

/// Short envelope applied when resuming after a seek, to mask the
/// discontinuity without a full configured fade
const SEEK_RESYNC_FADE_MS: u64 = 10;

/// Builds the output backend inside the engine thread. The closure must be
/// Send; what it returns never leaves the thread.
pub type BackendFactory = Box<dyn FnOnce() -> Box<dyn OutputBackend> + Send + 'static>;

/// Public handle to the playback engine.
///
/// Cheap to share behind an `Arc`; every method is callable from any
/// thread. Dropping the handle shuts the engine down in order: worker
/// joined, stream closed.
pub struct AudioEngine {
    commands: Sender<PlaybackCommand>,
    shared: Arc<SharedState>,
    ring: Arc<SampleRing>,
    dsp: Arc<Mutex<DspChain>>,
    fade: Arc<Mutex<FadeMachine>>,
    plan: Arc<Mutex<Option<OutputPlan>>>,
    metadata: Arc<dyn MetadataSource>,
    profiles: Arc<dyn ProfileStore>,
    thread: Option<thread::JoinHandle<()>>,
}

impl AudioEngine {
    /// Start the engine with the production backend and stores.
    pub fn new(config: EngineConfig) -> Result<Self> {
        let profile_dir = config
            .profile_dir
            .clone()
            .unwrap_or_else(|| PathBuf::from("."));

        Self::with_backend(
            config,
            Box::new(|| Box::new(CpalBackend::new())),
            Arc::new(JsonProfileStore::new(&profile_dir)),
            Arc::new(SymphoniaMetadata),
        )
    }

    /// Start the engine with substituted collaborators. This is the seam
    /// tests use to run the full engine without hardware.
    pub fn with_backend(
        config: EngineConfig,
        backend_factory: BackendFactory,
        profiles: Arc<dyn ProfileStore>,
        metadata: Arc<dyn MetadataSource>,
    ) -> Result<Self> {
        config.validate()?;

        let ring = Arc::new(SampleRing::new(config.ring_capacity));
        let dsp = Arc::new(Mutex::new(DspChain::new(44100, 2)));
        let fade = Arc::new(Mutex::new(FadeMachine::new()));
        let ramp = Arc::new(GainRamp::new(0.0));
        let shared = Arc::new(SharedState::new());
        let plan = Arc::new(Mutex::new(None));

        let (command_tx, command_rx) = bounded(config.command_queue_depth);
        let (worker_tx, worker_rx) = unbounded();

        let thread = {
            let ring = Arc::clone(&ring);
            let dsp = Arc::clone(&dsp);
            let shared = Arc::clone(&shared);
            let plan = Arc::clone(&plan);
            let profiles = Arc::clone(&profiles);
            let fade = Arc::clone(&fade);

            thread::Builder::new().name("audio-engine".into()).spawn(move || {
                EngineThread {
                    config,
                    backend: backend_factory(),
                    ring,
                    dsp,
                    fade,
                    ramp,
                    shared,
                    plan,
                    profiles,
                    worker: None,
                    worker_tx,
                    worker_rx,
                    commands: command_rx,
                }
                .run();
            })?
        };

        Ok(Self {
            commands: command_tx,
            shared,
            ring,
            dsp,
            fade,
            plan,
            metadata,
            profiles,
            thread: Some(thread),
        })
    }

    fn send(&self, command: PlaybackCommand) -> Result<()> {
        self.commands
            .send(command)
            .map_err(|_| Error::ChannelClosed)
    }

    /// Probe and start playing a file. Fails synchronously on unsupported
    /// formats; nothing about current playback changes on failure.
    pub fn play(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref().to_path_buf();
        let info = self.metadata.probe(&path)?;
        self.send(PlaybackCommand::Play { path, info })
    }

    /// Probe and queue the next track for a gapless transition.
    pub fn queue_next(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref().to_path_buf();
        let info = self.metadata.probe(&path)?;
        self.send(PlaybackCommand::QueueNext { path, info })
    }

    pub fn pause(&self) -> Result<()> {
        self.send(PlaybackCommand::Pause)
    }

    pub fn resume(&self) -> Result<()> {
        self.send(PlaybackCommand::Resume)
    }

    pub fn stop(&self) -> Result<()> {
        self.send(PlaybackCommand::Stop)
    }

    pub fn seek(&self, position_secs: f64) -> Result<()> {
        self.send(PlaybackCommand::Seek(position_secs))
    }

    pub fn set_volume(&self, volume: f32) -> Result<()> {
        self.send(PlaybackCommand::SetVolume(volume))
    }

    pub fn set_eq_enabled(&self, enabled: bool) -> Result<()> {
        self.send(PlaybackCommand::SetEqEnabled(enabled))
    }

    pub fn set_eq_band(&self, band: usize, gain_db: f32) -> Result<()> {
        self.send(PlaybackCommand::SetEqBand { band, gain_db })
    }

    pub fn set_eq_preset(&self, preset: crate::dsp::EqPreset) -> Result<()> {
        self.send(PlaybackCommand::SetEqPreset(preset))
    }

    pub fn set_replaygain_mode(&self, mode: crate::dsp::ReplayGainMode) -> Result<()> {
        self.send(PlaybackCommand::SetReplayGainMode(mode))
    }

    pub fn set_clipping_prevention(&self, on: bool) -> Result<()> {
        self.send(PlaybackCommand::SetClippingPrevention(on))
    }

    /// Current playback state snapshot.
    pub fn state(&self) -> PlaybackState {
        self.shared.snapshot()
    }

    /// Current master volume.
    pub fn volume(&self) -> f32 {
        self.shared.volume()
    }

    /// Current playback position in seconds, without taking the snapshot
    /// lock.
    pub fn position_secs(&self) -> f64 {
        self.shared.position_ms() as f64 / 1000.0
    }

    /// Current fade transition state. `FadingIn` after playback starts or
    /// resumes, `FadingOut` while pause or stop ramps down, `Crossfading`
    /// across a gapless boundary, `Idle` otherwise.
    pub fn fade_state(&self) -> FadeState {
        self.fade.lock().state()
    }

    /// Live reproduction-path diagnostics, including the bit-perfect
    /// verdict for the current configuration.
    pub fn diagnostics(&self) -> AudioDiagnostics {
        AudioDiagnostics::collect(
            &self.ring,
            self.plan.lock().as_ref(),
            &self.dsp.lock(),
            self.shared.volume(),
        )
    }

    /// All persisted device profiles.
    pub fn profiles(&self) -> Result<Vec<DeviceProfile>> {
        self.profiles.all()
    }

    /// One device's persisted profile, if any.
    pub fn profile(&self, device_name: &str) -> Result<Option<DeviceProfile>> {
        self.profiles.load(device_name)
    }

    /// Persist a profile. Takes effect the next time a stream opens on
    /// that device.
    pub fn save_profile(&self, profile: &DeviceProfile) -> Result<()> {
        self.profiles.save(profile)
    }

    /// Remove a device's persisted profile.
    pub fn delete_profile(&self, device_name: &str) -> Result<()> {
        self.profiles.delete(device_name)
    }

    /// Orderly shutdown: the command drains in order behind anything
    /// already queued.
    pub fn shutdown(mut self) {
        let _ = self.commands.send(PlaybackCommand::Shutdown);
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

impl Drop for AudioEngine {
    fn drop(&mut self) {
        let _ = self.commands.send(PlaybackCommand::Shutdown);
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

/// Everything owned by the engine thread.
struct EngineThread {
    config: EngineConfig,
    backend: Box<dyn OutputBackend>,
    ring: Arc<SampleRing>,
    dsp: Arc<Mutex<DspChain>>,
    fade: Arc<Mutex<FadeMachine>>,
    ramp: Arc<GainRamp>,
    shared: Arc<SharedState>,
    plan: Arc<Mutex<Option<OutputPlan>>>,
    profiles: Arc<dyn ProfileStore>,
    worker: Option<DecoderWorker>,
    worker_tx: Sender<WorkerEvent>,
    worker_rx: Receiver<WorkerEvent>,
    commands: Receiver<PlaybackCommand>,
}

impl EngineThread {
    fn run(mut self) {
        debug!("Engine thread started");

        loop {
            match self.commands.recv_timeout(TICK) {
                Ok(PlaybackCommand::Shutdown) => break,
                Ok(command) => {
                    if let Err(e) = self.handle_command(command) {
                        warn!("Command failed: {}", e);
                    }
                }
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => break,
            }

            self.drain_worker_events();
        }

        // Orderly teardown: worker joined before the stream closes
        if let Some(worker) = self.worker.take() {
            worker.stop();
        }
        self.backend.close();
        debug!("Engine thread stopped");
    }

    fn handle_command(&mut self, command: PlaybackCommand) -> Result<()> {
        match command {
            PlaybackCommand::Play { path, info } => self.handle_play(path, info),
            PlaybackCommand::QueueNext { path, info } => self.handle_queue_next(path, info),
            PlaybackCommand::Pause => self.handle_pause(),
            PlaybackCommand::Resume => self.handle_resume(),
            PlaybackCommand::Stop => self.handle_stop(),
            PlaybackCommand::Seek(position) => self.handle_seek(position),
            PlaybackCommand::SetVolume(volume) => self.handle_set_volume(volume),
            PlaybackCommand::SetEqEnabled(enabled) => {
                self.dsp.lock().equalizer.set_enabled(enabled);
                Ok(())
            }
            PlaybackCommand::SetEqBand { band, gain_db } => {
                self.dsp.lock().equalizer.set_band(band, gain_db);
                Ok(())
            }
            PlaybackCommand::SetEqPreset(preset) => {
                self.dsp.lock().equalizer.set_preset(preset);
                Ok(())
            }
            PlaybackCommand::SetReplayGainMode(mode) => {
                self.dsp.lock().replaygain.set_mode(mode);
                Ok(())
            }
            PlaybackCommand::SetClippingPrevention(on) => {
                self.dsp.lock().replaygain.set_clipping_prevention(on);
                Ok(())
            }
            PlaybackCommand::Shutdown => Ok(()),
        }
    }

    fn handle_play(&mut self, path: PathBuf, info: TrackInfo) -> Result<()> {
        info!(
            "Play: {} ({} Hz / {} ch / {:?} bit)",
            path.display(),
            info.spec.sample_rate,
            info.spec.channels,
            info.spec.bits_per_sample
        );

        if let Some(worker) = self.worker.take() {
            worker.stop();
            // stop() joins, so everything the old worker sent is already
            // queued. Anything still in the channel is about the old track.
            self.discard_worker_events();
        }
        self.ring.set_armed(false);
        self.ring.clear();
        *self.fade.lock() = FadeMachine::new();

        let plan = self.ensure_stream(&info.spec)?;

        self.dsp
            .lock()
            .prepare_for_track(&info.spec, info.replaygain.clone());

        self.shared.update(|s| {
            s.is_playing = true;
            s.is_paused = false;
            s.position_secs = 0.0;
            s.duration_secs = info.duration_secs;
            s.sample_rate = info.spec.sample_rate;
            s.bit_depth = info.spec.bits_per_sample;
            s.channels = info.spec.channels;
            s.current_file = Some(path.display().to_string());
            s.resampled = plan.resampled;
        });

        let ctx = WorkerContext {
            ring: Arc::clone(&self.ring),
            dsp: Arc::clone(&self.dsp),
            fade: Arc::clone(&self.fade),
            shared: Arc::clone(&self.shared),
            events: self.worker_tx.clone(),
            plan: plan.clone(),
            crossfade_frames: self.config.crossfade_ms * plan.sample_rate as u64 / 1000,
        };
        let worker = DecoderWorker::spawn(path, info, ctx)?;

        // Prime the buffer before arming dropout accounting, so startup
        // silence never counts as an underrun
        self.wait_for_prefill();
        self.ring.set_armed(true);

        let fade_frames = self.fade_frames(plan.sample_rate);
        self.ramp.set(0.0);
        self.ramp.ramp_to(1.0, fade_frames);
        self.fade.lock().begin_fade_in(fade_frames);
        self.backend.resume()?;

        self.worker = Some(worker);
        Ok(())
    }

    fn handle_queue_next(&mut self, path: PathBuf, info: TrackInfo) -> Result<()> {
        match &self.worker {
            Some(worker) => {
                info!("Queued next track: {}", path.display());
                worker.queue_next(path, info);
                Ok(())
            }
            // Nothing playing: behave like Play
            None => self.handle_play(path, info),
        }
    }

    fn handle_pause(&mut self) -> Result<()> {
        if self.worker.is_none() || self.shared.is_paused() {
            return Ok(());
        }

        // Ramp to silence before suspending so the cutoff never clicks
        let rate = self.active_sample_rate();
        let fade_frames = self.fade_frames(rate);
        self.ramp.ramp_to(0.0, fade_frames);
        self.fade.lock().begin_fade_out(fade_frames);
        thread::sleep(Duration::from_millis(self.config.fade_ms + 10));

        self.backend.pause()?;
        if let Some(worker) = &self.worker {
            worker.set_paused(true);
        }
        self.shared.set_playing_flags(true, true);
        debug!("Paused");
        Ok(())
    }

    fn handle_resume(&mut self) -> Result<()> {
        if self.worker.is_none() || !self.shared.is_paused() {
            return Ok(());
        }

        if let Some(worker) = &self.worker {
            worker.set_paused(false);
        }
        self.backend.resume()?;
        let rate = self.active_sample_rate();
        let fade_frames = self.fade_frames(rate);
        self.ramp.ramp_to(1.0, fade_frames);
        self.fade.lock().begin_fade_in(fade_frames);
        self.shared.set_playing_flags(true, false);
        debug!("Resumed");
        Ok(())
    }

    fn handle_stop(&mut self) -> Result<()> {
        if self.shared.is_playing() && !self.shared.is_paused() && self.backend.is_open() {
            let rate = self.active_sample_rate();
            let fade_frames = self.fade_frames(rate);
            self.ramp.ramp_to(0.0, fade_frames);
            self.fade.lock().begin_fade_out(fade_frames);
            thread::sleep(Duration::from_millis(self.config.fade_ms + 10));
        }

        if let Some(worker) = self.worker.take() {
            worker.stop();
            self.discard_worker_events();
        }
        self.backend.close();
        *self.plan.lock() = None;

        self.ring.set_armed(false);
        self.ring.clear();
        *self.fade.lock() = FadeMachine::new();
        self.ramp.set(0.0);
        self.dsp.lock().limiter.reset();
        self.shared.reset();

        info!("Stopped");
        Ok(())
    }

    fn handle_seek(&mut self, position_secs: f64) -> Result<()> {
        let worker = match &self.worker {
            Some(w) => w,
            None => return Err(Error::InvalidState("seek with nothing playing".into())),
        };

        let was_paused = self.shared.is_paused();
        self.backend.pause()?;

        worker.request_seek(position_secs);
        let deadline = Instant::now() + SEEK_ACK_TIMEOUT;
        while worker.seek_pending() && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(5));
        }
        if worker.seek_pending() {
            warn!("Seek not acknowledged within {:?}", SEEK_ACK_TIMEOUT);
        }

        // Discard pre-seek audio; re-sync silence is expected and must not
        // count as a dropout, so let the worker refill before re-arming
        self.ring.set_armed(false);
        self.ring.clear();
        self.shared
            .set_position_ms((position_secs.max(0.0) * 1000.0) as u64);
        if !was_paused {
            self.wait_for_prefill();
        }
        self.ring.set_armed(true);

        if !was_paused {
            let rate = self.active_sample_rate();
            self.ramp.set(0.0);
            self.ramp
                .ramp_to(1.0, SEEK_RESYNC_FADE_MS * rate as u64 / 1000);
            self.backend.resume()?;
        }

        debug!("Seek to {:.2}s complete", position_secs);
        Ok(())
    }

    fn handle_set_volume(&mut self, volume: f32) -> Result<()> {
        self.shared.set_volume(volume);

        // Remember the volume on the active device's profile
        let device_name = self.plan.lock().as_ref().map(|p| p.device_name.clone());
        if let Some(name) = device_name {
            let mut profile = self
                .profiles
                .load(&name)?
                .unwrap_or_else(|| DeviceProfile::for_device(&name));
            profile.volume = self.shared.volume();
            self.profiles.save(&profile)?;
        }
        Ok(())
    }

    /// Make sure an output stream is open whose plan fits `spec`,
    /// renegotiating only when the plan actually changes.
    fn ensure_stream(&mut self, spec: &StreamSpec) -> Result<OutputPlan> {
        let devices = self.backend.devices()?;
        let caps = select_device(&devices, self.config.preferred_device.as_deref())?;
        let profile = self
            .profiles
            .load(&caps.name)?
            .unwrap_or_else(|| DeviceProfile::for_device(&caps.name));

        let new_plan = negotiate(caps, spec, &profile);

        let unchanged = self.backend.is_open()
            && self.plan.lock().as_ref() == Some(&new_plan);
        if unchanged {
            return Ok(new_plan);
        }

        self.backend.close();
        let callback = self.make_callback(&new_plan);
        self.backend.open(&new_plan, callback)?;

        // Apply the device's remembered settings at stream open
        self.shared.set_volume(profile.volume);
        {
            let mut dsp = self.dsp.lock();
            dsp.replaygain.set_mode(profile.replaygain_mode);
            dsp.replaygain
                .set_clipping_prevention(profile.clipping_prevention);
        }

        if new_plan.shared_mode {
            warn!(
                "Shared-mode path on '{}' ({} Hz, resampled: {})",
                new_plan.device_name, new_plan.sample_rate, new_plan.resampled
            );
        }

        *self.plan.lock() = Some(new_plan.clone());
        Ok(new_plan)
    }

    /// The realtime fill callback. Pulls from the ring, applies the fade
    /// ramp and master volume per frame, and skips the multiply entirely
    /// at exact unity so the steady path stays bit-exact.
    fn make_callback(&self, plan: &OutputPlan) -> OutputCallback {
        let ring = Arc::clone(&self.ring);
        let ramp = Arc::clone(&self.ramp);
        let shared = Arc::clone(&self.shared);
        let fade = Arc::clone(&self.fade);
        let channels = plan.channels.max(1) as usize;

        Box::new(move |data: &mut [f32]| {
            ring.read_or_silence(data);

            let volume = shared.volume();
            for frame in data.chunks_mut(channels) {
                let gain = ramp.next_gain() * volume;
                if gain != 1.0 {
                    for sample in frame.iter_mut() {
                        *sample *= gain;
                    }
                }
            }

            // Fade-in/out progress tracks consumed frames. Crossfades are
            // advanced by the decoder worker as it mixes; try_lock keeps
            // this path non-blocking.
            if let Some(mut fade) = fade.try_lock() {
                if matches!(fade.state(), FadeState::FadingIn | FadeState::FadingOut) {
                    fade.advance((data.len() / channels) as u64);
                }
            }
        })
    }

    fn drain_worker_events(&mut self) {
        while let Ok(event) = self.worker_rx.try_recv() {
            match event {
                WorkerEvent::GaplessStarted { path, info } => {
                    let resampled = self
                        .plan
                        .lock()
                        .as_ref()
                        .map(|p| p.resampled || p.sample_rate != info.spec.sample_rate)
                        .unwrap_or(false);

                    self.shared.update(|s| {
                        s.position_secs = 0.0;
                        s.duration_secs = info.duration_secs;
                        s.sample_rate = info.spec.sample_rate;
                        s.bit_depth = info.spec.bits_per_sample;
                        s.channels = info.spec.channels;
                        s.current_file = Some(path.display().to_string());
                        s.resampled = resampled;
                    });
                }

                WorkerEvent::TrackFinished { path } => {
                    info!("Track finished: {}", path.display());
                    // A QueueNext that landed after the worker committed to
                    // finishing is still sitting in its slot; start it
                    // instead of tearing down.
                    let queued = self.worker.as_ref().and_then(|w| w.take_queued());
                    match queued {
                        Some((next_path, next_info)) => {
                            if let Err(e) = self.handle_play(next_path.clone(), next_info) {
                                warn!(
                                    "Queued track failed to start: {}: {}",
                                    next_path.display(),
                                    e
                                );
                                self.teardown_after_track();
                            }
                        }
                        None => self.teardown_after_track(),
                    }
                }

                WorkerEvent::TrackFailed { path, message } => {
                    error!("Track failed: {}: {}", path.display(), message);
                    self.teardown_after_track();
                }
            }
        }
    }

    /// Return to idle after the worker reported the end of the stream.
    fn teardown_after_track(&mut self) {
        if let Some(worker) = self.worker.take() {
            worker.stop();
        }
        self.backend.close();
        *self.plan.lock() = None;

        self.ring.set_armed(false);
        self.ring.clear();
        *self.fade.lock() = FadeMachine::new();
        self.ramp.set(0.0);
        self.shared.reset();
    }

    /// Wait (bounded) for the decoder worker to fill the ring far enough
    /// that the stream will not immediately underrun.
    fn wait_for_prefill(&self) {
        let deadline = Instant::now() + PREFILL_TIMEOUT;
        let target = PREFILL_TARGET.min(self.ring.capacity() / 2);
        while self.ring.len() < target && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(5));
        }
    }

    /// Drop events queued by a worker that has already been joined, so a
    /// finished old track cannot tear down the one replacing it.
    fn discard_worker_events(&mut self) {
        while self.worker_rx.try_recv().is_ok() {}
    }

    fn active_sample_rate(&self) -> u32 {
        self.plan
            .lock()
            .as_ref()
            .map(|p| p.sample_rate)
            .unwrap_or(48000)
    }

    fn fade_frames(&self, sample_rate: u32) -> u64 {
        self.config.fade_ms * sample_rate as u64 / 1000
    }
}
