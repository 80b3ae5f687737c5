use std::{
    sync::Arc,
    thread,
    time::{Duration, Instant},
};

use cauldron_core::{
    AudioClip, Cauldron, CauldronConfig, CauldronControl, CauldronState, InMemorySource,
    PacedSink, RecordingSink,
};

const FRAME_PERIOD_MS: u64 = 10;

fn build() -> (Cauldron, Arc<RecordingSink>) {
    let mut config = CauldronConfig {
        num_pixels: 50,
        frame_period_ms: FRAME_PERIOD_MS,
        seed: Some(2024),
        ..CauldronConfig::default()
    };
    config.bubbles.pop_durations_ms = vec![100, 200, 300];

    let source = InMemorySource::new()
        .with_clip(
            &config.sounds.bubbling,
            AudioClip::tone(110.0, Duration::from_millis(400), 8_000).unwrap(),
        )
        .with_clip(
            &config.sounds.explosion,
            AudioClip::burst(Duration::from_millis(300), 8_000, 9).unwrap(),
        );

    let sink = Arc::new(RecordingSink::new());
    let cauldron = Cauldron::new(
        &config,
        sink.clone(),
        &source,
        Arc::new(PacedSink::with_speed(20.0)),
    )
    .unwrap();
    (cauldron, sink)
}

#[test]
fn start_explode_five_times_then_stop() {
    let (cauldron, sink) = build();
    assert!(!cauldron.is_playing());

    cauldron.start().unwrap();
    let started = Instant::now();
    while !cauldron.is_playing() {
        assert!(started.elapsed() < Duration::from_millis(FRAME_PERIOD_MS));
        thread::yield_now();
    }
    assert_eq!(cauldron.state(), CauldronState::BaseLoop(0));

    let mut previous = cauldron.color_index();
    for _ in 0..5 {
        cauldron.cause_explosion().unwrap();
        assert!(cauldron.is_playing());
        let current = cauldron.color_index();
        assert_ne!(current, previous);
        assert!(current < cauldron.palette_len());
        previous = current;
        thread::sleep(Duration::from_millis(3 * FRAME_PERIOD_MS));
    }

    // The base loop lit the strip before stopping.
    let rendered = sink.len();
    assert!(rendered > 0);
    assert!(sink.frames().iter().any(|frame| !frame.is_dark()));

    cauldron.stop().unwrap();
    assert_eq!(cauldron.state(), CauldronState::Stopped);
    assert!(!cauldron.is_playing());
    let last = sink.last().unwrap();
    assert!(last.is_dark());
    assert_eq!(last.pixels.len(), 50);

    // Nothing renders after stop has returned.
    let after_stop = sink.len();
    thread::sleep(Duration::from_millis(5 * FRAME_PERIOD_MS));
    assert_eq!(sink.len(), after_stop);
}

#[test]
fn dropping_a_running_cauldron_leaves_the_strip_dark() {
    let (cauldron, sink) = build();
    cauldron.start().unwrap();
    cauldron.cause_explosion().unwrap();
    thread::sleep(Duration::from_millis(2 * FRAME_PERIOD_MS));
    drop(cauldron);

    let frames = sink.len();
    assert!(sink.last().unwrap().is_dark());
    thread::sleep(Duration::from_millis(3 * FRAME_PERIOD_MS));
    assert_eq!(sink.len(), frames);
}
