use super::*;

use std::{
    array,
    collections::VecDeque,
    sync::{atomic::AtomicUsize, Mutex as StdMutex},
};

use async_trait::async_trait;
use futures::StreamExt;
use shared::{
    domain::Symbol,
    protocol::{Grid, Prophecy, StreamEvent},
};
use tokio::{
    sync::mpsc,
    time::{sleep, sleep_until, Instant},
};
use tokio_stream::wrappers::UnboundedReceiverStream;

use crate::{
    audio::AudioSink,
    transport::ByteStream,
    verification::{ChallengeWidget, VERIFICATION_FAILED},
};

type Feed = mpsc::UnboundedSender<Result<Vec<u8>, OracleError>>;

#[derive(Default)]
struct ScriptedTransport {
    streams: StdMutex<VecDeque<mpsc::UnboundedReceiver<Result<Vec<u8>, OracleError>>>>,
    opened: StdMutex<Vec<(String, String)>>,
    refuse_with: Option<OracleError>,
}

impl ScriptedTransport {
    fn feed(&self) -> Feed {
        let (tx, rx) = mpsc::unbounded_channel();
        self.streams.lock().expect("streams").push_back(rx);
        tx
    }

    fn opened(&self) -> Vec<(String, String)> {
        self.opened.lock().expect("opened").clone()
    }
}

#[async_trait]
impl OracleTransport for ScriptedTransport {
    async fn open(&self, query: &str, verification_token: &str) -> Result<ByteStream, OracleError> {
        self.opened
            .lock()
            .expect("opened")
            .push((query.to_string(), verification_token.to_string()));
        if let Some(err) = &self.refuse_with {
            return Err(err.clone());
        }
        let rx = self
            .streams
            .lock()
            .expect("streams")
            .pop_front()
            .ok_or_else(|| OracleError::Transport("no scripted stream".into()))?;
        Ok(UnboundedReceiverStream::new(rx).boxed())
    }
}

#[derive(Default)]
struct CountingWidget {
    presented: AtomicUsize,
    resets: AtomicUsize,
}

impl ChallengeWidget for CountingWidget {
    fn present(&self) {
        self.presented.fetch_add(1, Ordering::SeqCst);
    }

    fn reset(&self) {
        self.resets.fetch_add(1, Ordering::SeqCst);
    }
}

#[derive(Default)]
struct CountingAudio {
    ambient: AtomicUsize,
    cues: AtomicUsize,
    stops: AtomicUsize,
}

impl AudioSink for CountingAudio {
    fn start_ambient(&self) -> anyhow::Result<()> {
        self.ambient.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn play_cue(&self) -> anyhow::Result<()> {
        self.cues.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn stop(&self) {
        self.stops.fetch_add(1, Ordering::SeqCst);
    }
}

struct Harness {
    controller: RunController,
    transport: Arc<ScriptedTransport>,
    widget: Arc<CountingWidget>,
    audio: Arc<CountingAudio>,
}

fn harness(timing: RevealTiming) -> Harness {
    harness_with(
        ScriptedTransport::default(),
        ControllerOptions {
            timing,
            stream_idle_timeout: None,
        },
        true,
    )
}

fn harness_with(transport: ScriptedTransport, options: ControllerOptions, verified: bool) -> Harness {
    let transport = Arc::new(transport);
    let widget = Arc::new(CountingWidget::default());
    let gate = VerificationGate::new(widget.clone());
    if verified {
        gate.callbacks().on_success("turnstile-ok");
    }
    let audio = Arc::new(CountingAudio::default());
    let controller = RunController::new(transport.clone(), gate, audio.clone(), options);
    Harness {
        controller,
        transport,
        widget,
        audio,
    }
}

fn numbered_grid() -> Grid {
    array::from_fn(|row| array::from_fn(|col| Symbol::from((row * 4 + col + 1) as i64)))
}

fn grid_frame() -> Vec<u8> {
    StreamEvent::GridCalculated {
        grid: numbered_grid(),
    }
    .frame()
    .into_bytes()
}

fn consonants_frame() -> Vec<u8> {
    StreamEvent::ConsonantsDerived {
        consonants: vec!["K".into(), "T".into(), "B".into()],
    }
    .frame()
    .into_bytes()
}

fn prophecy() -> Prophecy {
    Prophecy {
        prophecy: "Saturnus redit".into(),
        prophecy_en: "Saturn returns".into(),
    }
}

fn prophecy_frame() -> Vec<u8> {
    StreamEvent::ProphecyGenerated(prophecy()).frame().into_bytes()
}

fn ms(value: u64) -> Duration {
    Duration::from_millis(value)
}

fn send_all(feed: &Feed, frames: &[Vec<u8>]) {
    for frame in frames {
        feed.send(Ok(frame.clone())).expect("feed");
    }
}

#[tokio::test(start_paused = true)]
async fn blank_query_is_rejected_before_any_request() {
    let h = harness(RevealTiming::default());
    let err = h.controller.submit("   ").await.expect_err("blank");
    assert_eq!(err, OracleError::Validation(EMPTY_QUERY.into()));
    assert_eq!(h.controller.snapshot().error.as_deref(), Some(EMPTY_QUERY));
    assert!(h.transport.opened().is_empty());
}

#[tokio::test(start_paused = true)]
async fn missing_token_presents_the_challenge() {
    let h = harness_with(ScriptedTransport::default(), ControllerOptions::default(), false);
    let err = h.controller.submit("Who am I?").await.expect_err("unverified");
    assert_eq!(err, OracleError::Validation(VERIFY_FIRST.into()));
    assert_eq!(h.widget.presented.load(Ordering::SeqCst), 1);
    assert!(h.transport.opened().is_empty());
}

#[tokio::test(start_paused = true)]
async fn widget_error_is_what_the_user_sees() {
    let h = harness_with(ScriptedTransport::default(), ControllerOptions::default(), false);
    h.controller.verification().callbacks().on_error();
    let err = h.controller.submit("Who am I?").await.expect_err("widget failed");
    assert_eq!(err, OracleError::Validation(VERIFICATION_FAILED.into()));
}

#[tokio::test(start_paused = true)]
async fn grid_reveals_row_major_on_its_cadence() {
    let h = harness(RevealTiming::default());
    let feed = h.transport.feed();
    send_all(&feed, &[grid_frame()]);

    let started = Instant::now();
    h.controller.submit("Will it rain?").await.expect("submit");
    assert_eq!(
        h.transport.opened(),
        vec![("Will it rain?".to_string(), "turnstile-ok".to_string())]
    );

    sleep_until(started + ms(40)).await;
    let view = h.controller.snapshot();
    assert_eq!(view.phase, RunPhase::RevealingGrid);
    assert_eq!(view.revealed_cells(), 0);

    sleep_until(started + ms(60)).await;
    let view = h.controller.snapshot();
    assert_eq!(view.grid[0][0], Some(Symbol::from(1_i64)));
    assert_eq!(view.revealed_cells(), 1);

    sleep_until(started + ms(1_060)).await;
    let view = h.controller.snapshot();
    assert_eq!(view.grid[0][1], Some(Symbol::from(2_i64)));
    assert_eq!(view.grid[1][0], None);

    sleep_until(started + ms(15_040)).await;
    let view = h.controller.snapshot();
    assert_eq!(view.revealed_cells(), 15);
    assert_eq!(view.grid[3][3], None);

    sleep_until(started + ms(15_060)).await;
    let view = h.controller.snapshot();
    assert_eq!(view.grid[3][3], Some(Symbol::from(16_i64)));
    assert_eq!(h.audio.cues.load(Ordering::SeqCst), 16);
}

#[tokio::test(start_paused = true)]
async fn full_run_reveals_stages_strictly_in_order() {
    let h = harness(RevealTiming::default());
    let feed = h.transport.feed();
    send_all(&feed, &[grid_frame(), consonants_frame(), prophecy_frame()]);
    drop(feed);

    let mut updates = h.controller.subscribe();
    let run = h.controller.submit("What do the stars hold?").await.expect("submit");

    let mut cells = Vec::new();
    let mut glyphs = Vec::new();
    let mut statuses = Vec::new();
    let mut order = Vec::new();
    loop {
        let update = updates.recv().await.expect("update");
        assert_eq!(update.run(), run);
        match update {
            RevealUpdate::CellRevealed { row, col, .. } => {
                if cells.is_empty() {
                    order.push("grid");
                }
                cells.push((row, col));
            }
            RevealUpdate::GlyphRevealed { glyph, visible, .. } => {
                if glyphs.is_empty() {
                    order.push("glyphs");
                }
                glyphs.push((glyph, visible));
            }
            RevealUpdate::StatusChanged { status, .. } => statuses.push(status),
            RevealUpdate::ProphecyRevealed { prophecy: shown, .. } => {
                order.push("prophecy");
                assert_eq!(shown, prophecy());
            }
            RevealUpdate::Completed { .. } => break,
            RevealUpdate::Failed { error, .. } => panic!("run failed: {error}"),
            _ => {}
        }
    }

    assert_eq!(order, vec!["grid", "glyphs", "prophecy"]);
    let expected_cells: Vec<_> = (0..4).flat_map(|r| (0..4).map(move |c| (r, c))).collect();
    assert_eq!(cells, expected_cells);
    assert_eq!(
        glyphs,
        vec![
            ("K".to_string(), 1),
            (",".to_string(), 2),
            ("T".to_string(), 3),
            (",".to_string(), 4),
            ("B".to_string(), 5),
        ]
    );
    assert_eq!(
        statuses,
        vec![STATUS_DECODING, STATUS_DECRYPTING, STATUS_SPOKEN]
    );

    let view = h.controller.settled().await;
    assert_eq!(view.phase, RunPhase::Done);
    assert_eq!(view.stage, RevealStage::Prophecy);
    assert_eq!(view.visible_glyph_text(), "K,T,B");
    assert!(!view.loading);
    assert_eq!(view.error, None);
    assert_eq!(h.audio.cues.load(Ordering::SeqCst), 21);
}

#[tokio::test(start_paused = true)]
async fn early_prophecy_waits_for_the_glyph_reveal() {
    let timing = RevealTiming {
        interval: ms(1_000),
        grid_lead: Duration::ZERO,
        settle: Duration::ZERO,
    };
    let h = harness(timing);
    let feed = h.transport.feed();
    send_all(&feed, &[grid_frame(), consonants_frame(), prophecy_frame()]);

    let started = Instant::now();
    h.controller.submit("Is the prophecy patient?").await.expect("submit");

    // 16 cells, then 5 glyphs, at one second each.
    sleep_until(started + ms(20_990)).await;
    let view = h.controller.snapshot();
    assert_eq!(view.phase, RunPhase::RevealingConsonants);
    assert_eq!(view.prophecy, None);
    assert!(view.loading);

    sleep_until(started + ms(21_010)).await;
    let view = h.controller.snapshot();
    assert_eq!(view.prophecy, Some(prophecy()));
    assert_eq!(view.status.as_deref(), Some(STATUS_SPOKEN));
}

#[tokio::test(start_paused = true)]
async fn consonants_arriving_late_start_as_soon_as_they_land() {
    let timing = RevealTiming {
        interval: ms(100),
        grid_lead: Duration::ZERO,
        settle: Duration::ZERO,
    };
    let h = harness(timing);
    let feed = h.transport.feed();
    send_all(&feed, &[grid_frame()]);

    let started = Instant::now();
    h.controller.submit("Slow oracle?").await.expect("submit");

    sleep_until(started + ms(5_000)).await;
    assert_eq!(h.controller.snapshot().phase, RunPhase::AwaitingConsonants);

    send_all(&feed, &[consonants_frame()]);
    sleep(ms(50)).await;
    let view = h.controller.snapshot();
    assert_eq!(view.phase, RunPhase::RevealingConsonants);
    assert_eq!(view.visible_glyphs, 1);
}

#[tokio::test(start_paused = true)]
async fn new_submission_silences_the_previous_run() {
    let h = harness(RevealTiming::default());
    let first_feed = h.transport.feed();
    send_all(&first_feed, &[grid_frame(), consonants_frame()]);
    let _second_feed = h.transport.feed();

    let started = Instant::now();
    let first = h.controller.submit("First question").await.expect("first");
    sleep_until(started + ms(3_060)).await;
    assert_eq!(h.controller.snapshot().revealed_cells(), 3);

    let mut updates = h.controller.subscribe();
    let second = h.controller.submit("Second question").await.expect("second");
    assert_ne!(first, second);

    let view = h.controller.snapshot();
    assert_eq!(view.run, Some(second));
    assert_eq!(view.revealed_cells(), 0);

    sleep(Duration::from_secs(30)).await;
    let view = h.controller.snapshot();
    assert_eq!(view.run, Some(second));
    assert_eq!(view.revealed_cells(), 0);
    assert_eq!(view.visible_glyphs, 0);

    while let Ok(update) = updates.try_recv() {
        assert_eq!(update.run(), second, "stale update {update:?}");
    }
}

#[tokio::test(start_paused = true)]
async fn upstream_error_aborts_without_revealing_prophecy() {
    let h = harness(RevealTiming::default());
    let feed = h.transport.feed();
    feed.send(Ok(
        b"data: {\"step\":\"prophecy_generated\",\"error\":\"oracle offline\"}\n\n".to_vec(),
    ))
    .expect("feed");

    h.controller.submit("Are you there?").await.expect("submit");
    let view = h.controller.settled().await;

    assert_eq!(view.phase, RunPhase::Failed);
    assert_eq!(view.error.as_deref(), Some("oracle offline"));
    assert_eq!(view.prophecy, None);
    assert!(!view.loading);
    assert!(!h.controller.verification().is_verified());
    assert_eq!(h.widget.resets.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn transport_failure_keeps_partial_reveal() {
    let h = harness(RevealTiming::default());
    let feed = h.transport.feed();
    send_all(&feed, &[grid_frame()]);

    let started = Instant::now();
    h.controller.submit("Half a prophecy?").await.expect("submit");
    sleep_until(started + ms(1_060)).await;

    feed.send(Err(OracleError::Transport("connection reset".into())))
        .expect("feed");
    let view = h.controller.settled().await;
    assert_eq!(view.phase, RunPhase::Failed);
    assert_eq!(view.error.as_deref(), Some("connection reset"));
    assert_eq!(view.revealed_cells(), 2);

    sleep(Duration::from_secs(20)).await;
    assert_eq!(h.controller.snapshot().revealed_cells(), 2);

    let err = h.controller.submit("Again?").await.expect_err("token cleared");
    assert_eq!(err, OracleError::Validation(VERIFY_FIRST.into()));
}

#[tokio::test(start_paused = true)]
async fn stream_closing_before_prophecy_fails_the_run() {
    let h = harness(RevealTiming::default());
    let feed = h.transport.feed();
    send_all(&feed, &[grid_frame()]);
    drop(feed);

    h.controller.submit("Anyone?").await.expect("submit");
    let view = h.controller.settled().await;
    assert_eq!(view.phase, RunPhase::Failed);
    assert_eq!(view.error.as_deref(), Some(run::SILENT_BEFORE_PROPHECY));
}

#[tokio::test(start_paused = true)]
async fn stream_closing_with_a_stage_missing_fails_the_run() {
    let h = harness(RevealTiming::default());
    let feed = h.transport.feed();
    send_all(&feed, &[grid_frame(), prophecy_frame()]);
    drop(feed);

    h.controller.submit("Where are the glyphs?").await.expect("submit");
    let view = tokio::time::timeout(Duration::from_secs(3_600), h.controller.settled())
        .await
        .expect("run settles");
    assert_eq!(view.phase, RunPhase::Failed);
    assert_eq!(view.error.as_deref(), Some(run::STAGES_MISSING));
    assert_eq!(view.prophecy, None);
    assert!(!view.loading);
    assert_eq!(h.widget.resets.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn stream_may_close_once_every_stage_arrived() {
    let h = harness(RevealTiming::default());
    let feed = h.transport.feed();
    send_all(&feed, &[grid_frame(), consonants_frame(), prophecy_frame()]);
    drop(feed);

    h.controller.submit("All at once?").await.expect("submit");
    let view = h.controller.settled().await;
    assert_eq!(view.phase, RunPhase::Done);
    assert_eq!(view.revealed_cells(), 16);
    assert_eq!(view.prophecy, Some(prophecy()));
    assert_eq!(view.error, None);
}

#[tokio::test(start_paused = true)]
async fn malformed_event_keeps_partial_reveal_and_resets_challenge() {
    let h = harness(RevealTiming::default());
    let feed = h.transport.feed();
    send_all(&feed, &[grid_frame()]);

    let started = Instant::now();
    h.controller.submit("Garbled stars?").await.expect("submit");
    sleep_until(started + ms(1_060)).await;
    assert_eq!(h.controller.snapshot().revealed_cells(), 2);

    feed.send(Ok(b"data: {not json}\n\n".to_vec())).expect("feed");
    let view = h.controller.settled().await;
    assert_eq!(view.phase, RunPhase::Failed);
    let error = view.error.as_deref().unwrap_or_default();
    assert!(error.starts_with("malformed event:"), "{error}");
    assert_eq!(view.revealed_cells(), 2);
    assert!(!view.loading);

    sleep(Duration::from_secs(20)).await;
    assert_eq!(h.controller.snapshot().revealed_cells(), 2);
    assert_eq!(h.widget.resets.load(Ordering::SeqCst), 1);
    assert!(!h.controller.verification().is_verified());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn updates_after_run_started_belong_to_that_run() {
    let timing = RevealTiming {
        interval: ms(1),
        grid_lead: Duration::ZERO,
        settle: ms(1),
    };
    let h = harness(timing);
    let mut updates = h.controller.subscribe();
    let mut feeds = Vec::new();

    for round in 0..6_u64 {
        let feed = h.transport.feed();
        send_all(&feed, &[grid_frame(), consonants_frame(), prophecy_frame()]);
        feeds.push(feed);
        h.controller
            .submit(&format!("Question {round}"))
            .await
            .expect("submit");
        sleep(ms(round % 3)).await;
    }
    let view = tokio::time::timeout(Duration::from_secs(10), h.controller.settled())
        .await
        .expect("last run settles");
    assert_eq!(view.phase, RunPhase::Done);

    let mut current = None;
    let mut started = 0;
    while let Ok(update) = updates.try_recv() {
        match update {
            RevealUpdate::RunStarted { run } => {
                current = Some(run);
                started += 1;
            }
            other => assert_eq!(Some(other.run()), current, "stale update {other:?}"),
        }
    }
    assert_eq!(started, 6);
}

#[tokio::test(start_paused = true)]
async fn refused_request_surfaces_status_and_resets_challenge() {
    let refused = OracleError::Transport("The connection to the astral plane was severed: 503".into());
    let transport = ScriptedTransport {
        refuse_with: Some(refused.clone()),
        ..ScriptedTransport::default()
    };
    let h = harness_with(transport, ControllerOptions::default(), true);

    h.controller.submit("Is the oracle awake?").await.expect("submit");
    let view = h.controller.settled().await;
    assert_eq!(view.phase, RunPhase::Failed);
    assert_eq!(view.error, Some(refused.to_string()));
    assert_eq!(view.status.as_deref(), Some(STATUS_SUBMITTED));
    assert_eq!(h.widget.presented.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn silent_stream_hits_the_idle_timeout() {
    let options = ControllerOptions {
        timing: RevealTiming::default(),
        stream_idle_timeout: Some(Duration::from_secs(30)),
    };
    let transport = ScriptedTransport::default();
    let _feed = transport.feed();
    let h = harness_with(transport, options, true);

    let started = Instant::now();
    h.controller.submit("Hello?").await.expect("submit");
    let view = h.controller.settled().await;

    assert_eq!(view.phase, RunPhase::Failed);
    assert!(started.elapsed() >= Duration::from_secs(30));
    assert_eq!(
        view.error.as_deref(),
        Some("no data received from the oracle for 30 seconds")
    );
}

#[tokio::test(start_paused = true)]
async fn cancel_and_shutdown_stop_everything() {
    let h = harness(RevealTiming::default());
    let feed = h.transport.feed();
    send_all(&feed, &[grid_frame()]);
    assert_eq!(h.audio.ambient.load(Ordering::SeqCst), 1);

    let started = Instant::now();
    h.controller.submit("Stop me").await.expect("submit");
    sleep_until(started + ms(1_060)).await;

    h.controller.cancel().await;
    assert_eq!(h.controller.snapshot(), RevealView::default());
    sleep(Duration::from_secs(5)).await;
    assert_eq!(h.controller.snapshot().revealed_cells(), 0);
    assert_eq!(h.audio.cues.load(Ordering::SeqCst), 2);

    h.controller.shutdown().await;
    h.controller.shutdown().await;
    assert_eq!(h.audio.stops.load(Ordering::SeqCst), 1);
}
