//! Full-engine integration tests against a mock output backend.
//!
//! The mock stands in for the audio device: tests pump its callback the
//! way real hardware would, so the whole pipeline (probe, worker, ring,
//! callback, teardown) runs without sound hardware.

mod common;

use common::{consumer_device, hifi_device, MockBackend, MockOutput};
use purist::audio::{DeviceCapabilities, SymphoniaMetadata};
use purist::playback::FadeState;
use purist::profiles::JsonProfileStore;
use purist::{AudioEngine, EngineConfig};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use tempfile::tempdir;

fn test_config() -> EngineConfig {
    EngineConfig {
        fade_ms: 10,
        crossfade_ms: 100,
        ..Default::default()
    }
}

fn start_engine(
    devices: Vec<DeviceCapabilities>,
    profile_dir: &Path,
    config: EngineConfig,
) -> (AudioEngine, Arc<MockOutput>) {
    let output = MockOutput::new();
    let backend_state = Arc::clone(&output);

    let engine = AudioEngine::with_backend(
        config,
        Box::new(move || Box::new(MockBackend::new(devices, backend_state))),
        Arc::new(JsonProfileStore::new(profile_dir)),
        Arc::new(SymphoniaMetadata),
    )
    .unwrap();

    (engine, output)
}

/// Drive the mock callback from a background thread, like hardware would.
fn spawn_pump(output: Arc<MockOutput>) -> (Arc<AtomicBool>, thread::JoinHandle<()>) {
    let done = Arc::new(AtomicBool::new(false));
    let handle = {
        let done = Arc::clone(&done);
        thread::spawn(move || {
            while !done.load(Ordering::Relaxed) {
                output.pump(512);
                thread::sleep(Duration::from_millis(1));
            }
        })
    };
    (done, handle)
}

fn wait_until(timeout: Duration, mut predicate: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if predicate() {
            return true;
        }
        thread::sleep(Duration::from_millis(10));
    }
    predicate()
}

#[test]
fn exclusive_path_is_bit_perfect() {
    let dir = tempdir().unwrap();
    let wav = common::write_sine_wav(dir.path(), "tone.wav", 44100, 2, 1.0, 440.0);
    let (engine, output) = start_engine(vec![hifi_device()], dir.path(), test_config());
    let (done, pump) = spawn_pump(Arc::clone(&output));

    engine.play(&wav).unwrap();
    assert!(wait_until(Duration::from_secs(5), || output.plan().is_some()));

    let plan = output.plan().unwrap();
    assert!(plan.exclusive);
    assert!(!plan.shared_mode);
    assert!(!plan.resampled);
    assert_eq!(plan.sample_rate, 44100);

    let diag = engine.diagnostics();
    assert!(diag.is_bit_perfect);
    assert_eq!(diag.output_sample_rate, 44100);

    done.store(true, Ordering::Relaxed);
    pump.join().unwrap();
    engine.shutdown();
}

#[test]
fn unsupported_rate_degrades_to_shared_mode() {
    // 44.1kHz source on a device locked to 48kHz: playback proceeds in
    // shared mode with resampling, honestly reported, never an error.
    let dir = tempdir().unwrap();
    let wav = common::write_sine_wav(dir.path(), "tone.wav", 44100, 2, 1.0, 440.0);
    let (engine, output) = start_engine(vec![consumer_device()], dir.path(), test_config());
    let (done, pump) = spawn_pump(Arc::clone(&output));

    engine.play(&wav).unwrap();
    assert!(wait_until(Duration::from_secs(5), || output.plan().is_some()));

    let plan = output.plan().unwrap();
    assert!(!plan.exclusive);
    assert!(plan.shared_mode);
    assert!(plan.resampled);
    assert_eq!(plan.sample_rate, 48000);

    let state = engine.state();
    assert!(state.resampled);
    assert_eq!(state.sample_rate, 44100); // source format, not device format

    let diag = engine.diagnostics();
    assert!(!diag.is_bit_perfect);
    assert!(diag.shared_mode);

    done.store(true, Ordering::Relaxed);
    pump.join().unwrap();
    engine.shutdown();
}

#[test]
fn unsupported_format_fails_fast_without_touching_playback() {
    let dir = tempdir().unwrap();
    let bad = dir.path().join("bad.flac");
    std::fs::write(&bad, b"junk").unwrap();
    let (engine, output) = start_engine(vec![hifi_device()], dir.path(), test_config());

    let err = engine.play(&bad).unwrap_err();
    assert!(matches!(err, purist::Error::UnsupportedFormat(_)));

    // Nothing was started
    assert!(!output.is_open());
    assert!(!engine.state().is_playing);
    engine.shutdown();
}

#[test]
fn track_plays_to_completion_and_engine_returns_to_idle() {
    let dir = tempdir().unwrap();
    let wav = common::write_sine_wav(dir.path(), "short.wav", 44100, 2, 0.3, 440.0);
    let (engine, output) = start_engine(vec![hifi_device()], dir.path(), test_config());
    let (done, pump) = spawn_pump(Arc::clone(&output));

    engine.play(&wav).unwrap();
    assert!(wait_until(Duration::from_secs(5), || engine.state().is_playing));
    assert!(wait_until(Duration::from_secs(10), || !engine
        .state()
        .is_playing));

    let state = engine.state();
    assert_eq!(state.position_secs, 0.0);
    assert!(state.current_file.is_none());

    // Real audio reached the device
    let captured = output.captured();
    assert!(captured.iter().any(|&s| s != 0.0));

    done.store(true, Ordering::Relaxed);
    pump.join().unwrap();
    engine.shutdown();
}

#[test]
fn gapless_transition_reaches_second_track() {
    let dir = tempdir().unwrap();
    // The first track is larger than the ring so the worker is still
    // mid-decode when the queue request arrives.
    let first = common::write_sine_wav(dir.path(), "one.wav", 44100, 2, 3.0, 440.0);
    let second = common::write_sine_wav(dir.path(), "two.wav", 44100, 2, 0.4, 880.0);
    let (engine, output) = start_engine(vec![hifi_device()], dir.path(), test_config());
    let (done, pump) = spawn_pump(Arc::clone(&output));

    engine.play(&first).unwrap();
    engine.queue_next(&second).unwrap();

    // The engine must report the handoff to the second file
    assert!(wait_until(Duration::from_secs(10), || {
        engine
            .state()
            .current_file
            .as_deref()
            .map(|f| f.ends_with("two.wav"))
            .unwrap_or(false)
    }));

    // And then finish it
    assert!(wait_until(Duration::from_secs(10), || !engine
        .state()
        .is_playing));

    // The audible span of the delivered stream must contain no silent gap
    // at the boundary. Sine zero crossings quantize to at most a few zero
    // samples in a row; a dropped boundary would show up as thousands.
    let captured = output.captured();
    let first_sound = captured.iter().position(|&s| s != 0.0).unwrap();
    let last_sound = captured.iter().rposition(|&s| s != 0.0).unwrap();
    let span = &captured[first_sound..=last_sound];

    let mut run = 0usize;
    let mut longest_silence = 0usize;
    for &s in span {
        if s == 0.0 {
            run += 1;
            longest_silence = longest_silence.max(run);
        } else {
            run = 0;
        }
    }
    assert!(
        longest_silence < 1000,
        "silent gap of {} samples in the output stream",
        longest_silence
    );

    // 3.0s + 0.4s tracks overlapped by the 100ms crossfade window come out
    // to about 3.3s of audio. Back-to-back concatenation (no overlap)
    // would be 3.4s and a skipped window would be short of 3.3s.
    let frames = span.len() / 2;
    assert!(
        (144_000..147_500).contains(&frames),
        "delivered {} frames, expected about 145530",
        frames
    );

    done.store(true, Ordering::Relaxed);
    pump.join().unwrap();
    engine.shutdown();
}

#[test]
fn new_playback_survives_finish_of_previous_track() {
    // A track ending naturally queues a finish event for the engine. When
    // a new play lands in the same window, that event is about the old
    // worker and must not tear the new playback down. Sweep the start of
    // the second play across the end of the first track to cover the
    // interleavings.
    let dir = tempdir().unwrap();
    let short = common::write_sine_wav(dir.path(), "short.wav", 44100, 2, 0.3, 440.0);
    let long = common::write_sine_wav(dir.path(), "long.wav", 44100, 2, 5.0, 440.0);
    let (engine, output) = start_engine(vec![hifi_device()], dir.path(), test_config());
    let (done, pump) = spawn_pump(Arc::clone(&output));

    for offset_ms in [40u64, 60, 80, 100, 120] {
        engine.play(&short).unwrap();
        thread::sleep(Duration::from_millis(offset_ms));
        engine.play(&long).unwrap();

        assert!(
            wait_until(Duration::from_secs(5), || {
                engine
                    .state()
                    .current_file
                    .as_deref()
                    .map(|f| f.ends_with("long.wav"))
                    .unwrap_or(false)
            }),
            "second play (offset {}ms) never started",
            offset_ms
        );

        thread::sleep(Duration::from_millis(250));
        let state = engine.state();
        assert!(
            state.is_playing
                && state
                    .current_file
                    .as_deref()
                    .map(|f| f.ends_with("long.wav"))
                    .unwrap_or(false),
            "playback torn down after {}ms offset (is_playing={}, file={:?})",
            offset_ms,
            state.is_playing,
            state.current_file
        );

        engine.stop().unwrap();
        assert!(wait_until(Duration::from_secs(5), || !engine
            .state()
            .is_playing));
    }

    done.store(true, Ordering::Relaxed);
    pump.join().unwrap();
    engine.shutdown();
}

#[test]
fn fade_states_are_reported_through_transitions() {
    let dir = tempdir().unwrap();
    let wav = common::write_sine_wav(dir.path(), "tone.wav", 44100, 2, 10.0, 440.0);
    let config = EngineConfig {
        fade_ms: 400,
        crossfade_ms: 100,
        ..Default::default()
    };
    let (engine, output) = start_engine(vec![hifi_device()], dir.path(), config);
    let (done, pump) = spawn_pump(Arc::clone(&output));

    engine.play(&wav).unwrap();
    assert!(wait_until(Duration::from_secs(5), || engine.fade_state()
        == FadeState::FadingIn));
    assert!(wait_until(Duration::from_secs(5), || engine.fade_state()
        == FadeState::Idle));

    engine.pause().unwrap();
    assert!(wait_until(Duration::from_secs(5), || engine.fade_state()
        == FadeState::FadingOut));
    assert!(wait_until(Duration::from_secs(5), || engine.state().is_paused));
    assert!(wait_until(Duration::from_secs(5), || engine.fade_state()
        == FadeState::Idle));

    engine.resume().unwrap();
    assert!(wait_until(Duration::from_secs(5), || engine.fade_state()
        == FadeState::FadingIn));
    assert!(wait_until(Duration::from_secs(5), || engine.fade_state()
        == FadeState::Idle));

    done.store(true, Ordering::Relaxed);
    pump.join().unwrap();
    engine.shutdown();
}

#[test]
fn seek_resync_is_never_counted_as_a_dropout() {
    let dir = tempdir().unwrap();
    let wav = common::write_sine_wav(dir.path(), "tone.wav", 44100, 2, 3.0, 440.0);
    let (engine, output) = start_engine(vec![hifi_device()], dir.path(), test_config());
    let (done, pump) = spawn_pump(Arc::clone(&output));

    engine.play(&wav).unwrap();
    assert!(wait_until(Duration::from_secs(5), || engine.state().is_playing));
    assert_eq!(engine.diagnostics().dropout_count, 0);

    engine.seek(1.5).unwrap();
    // Play on past the discontinuity, then check before the track ends
    thread::sleep(Duration::from_millis(150));
    assert!(engine.state().is_playing);
    assert_eq!(engine.diagnostics().dropout_count, 0);

    engine.stop().unwrap();
    done.store(true, Ordering::Relaxed);
    pump.join().unwrap();
    engine.shutdown();
}

#[test]
fn queue_next_during_final_drain_still_plays_the_track() {
    // A short first track decodes to end of stream almost immediately, so
    // a queue request arriving afterwards finds the worker already
    // draining. The second track must play anyway.
    let dir = tempdir().unwrap();
    let first = common::write_sine_wav(dir.path(), "one.wav", 44100, 2, 0.4, 440.0);
    let second = common::write_sine_wav(dir.path(), "two.wav", 44100, 2, 0.4, 880.0);
    let (engine, output) = start_engine(vec![hifi_device()], dir.path(), test_config());
    let (done, pump) = spawn_pump(Arc::clone(&output));

    engine.play(&first).unwrap();
    thread::sleep(Duration::from_millis(40));
    engine.queue_next(&second).unwrap();

    assert!(wait_until(Duration::from_secs(10), || {
        engine
            .state()
            .current_file
            .as_deref()
            .map(|f| f.ends_with("two.wav"))
            .unwrap_or(false)
    }));
    assert!(wait_until(Duration::from_secs(10), || !engine
        .state()
        .is_playing));

    done.store(true, Ordering::Relaxed);
    pump.join().unwrap();
    engine.shutdown();
}

#[test]
fn pause_suspends_stream_and_resume_continues() {
    let dir = tempdir().unwrap();
    let wav = common::write_sine_wav(dir.path(), "tone.wav", 44100, 2, 2.0, 440.0);
    let (engine, output) = start_engine(vec![hifi_device()], dir.path(), test_config());
    let (done, pump) = spawn_pump(Arc::clone(&output));

    engine.play(&wav).unwrap();
    assert!(wait_until(Duration::from_secs(5), || engine.state().is_playing));

    engine.pause().unwrap();
    assert!(wait_until(Duration::from_secs(5), || engine.state().is_paused));
    assert!(!output.is_playing());

    let paused_at = output.captured_len();
    thread::sleep(Duration::from_millis(100));
    // The pump keeps running but the stream is suspended
    assert_eq!(output.captured_len(), paused_at);

    engine.resume().unwrap();
    assert!(wait_until(Duration::from_secs(5), || !engine.state().is_paused));
    assert!(wait_until(Duration::from_secs(5), || output.captured_len()
        > paused_at));

    done.store(true, Ordering::Relaxed);
    pump.join().unwrap();
    engine.shutdown();
}

#[test]
fn seek_near_end_then_stop_leaves_clean_idle_state() {
    let dir = tempdir().unwrap();
    let wav = common::write_sine_wav(dir.path(), "tone.wav", 44100, 2, 1.0, 440.0);
    let (engine, output) = start_engine(vec![hifi_device()], dir.path(), test_config());
    let (done, pump) = spawn_pump(Arc::clone(&output));

    engine.play(&wav).unwrap();
    assert!(wait_until(Duration::from_secs(5), || engine.state().is_playing));

    engine.seek(0.9).unwrap();
    engine.stop().unwrap();

    assert!(wait_until(Duration::from_secs(5), || !engine
        .state()
        .is_playing));

    let state = engine.state();
    assert_eq!(state.position_secs, 0.0);
    assert!(state.current_file.is_none());
    assert!(!state.is_paused);

    let diag = engine.diagnostics();
    assert_eq!(diag.buffer_filled, 0);

    done.store(true, Ordering::Relaxed);
    pump.join().unwrap();
    engine.shutdown();
}

#[test]
fn volume_changes_persist_to_the_device_profile() {
    let dir = tempdir().unwrap();
    let wav = common::write_sine_wav(dir.path(), "tone.wav", 44100, 2, 2.0, 440.0);
    let (engine, output) = start_engine(vec![hifi_device()], dir.path(), test_config());
    let (done, pump) = spawn_pump(Arc::clone(&output));

    engine.play(&wav).unwrap();
    assert!(wait_until(Duration::from_secs(5), || output.plan().is_some()));

    engine.set_volume(0.5).unwrap();
    assert!(wait_until(Duration::from_secs(5), || {
        engine
            .profiles()
            .ok()
            .and_then(|p| p.into_iter().find(|p| p.device_name == "Mock HiFi DAC"))
            .map(|p| (p.volume - 0.5).abs() < 1e-6)
            .unwrap_or(false)
    }));

    // Reduced volume disqualifies the bit-perfect claim
    assert!(!engine.diagnostics().is_bit_perfect);

    done.store(true, Ordering::Relaxed);
    pump.join().unwrap();
    engine.shutdown();
}
