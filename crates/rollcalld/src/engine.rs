use chrono::NaiveDateTime;
use rollcall_core::{
    build_reference_set, Config, EnrollError, ExtractError, FaceExtractor, MatchResult, Matcher,
    NearestNeighborMatcher, OnnxExtractor, ReferenceSet,
};
use rollcall_hw::{Camera, CameraError, FrameSource};
use rollcall_ledger::{Ledger, LedgerError, RecordOutcome};
use std::sync::atomic::{AtomicBool, Ordering};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("model error: {0}")]
    Models(#[from] ExtractError),
    #[error("enrollment failed: {0}")]
    Enroll(#[from] EnrollError),
    #[error("camera error: {0}")]
    Camera(#[from] CameraError),
    #[error("ledger error: {0}")]
    Ledger(#[from] LedgerError),
}

/// What happened to one face in one frame.
#[derive(Debug, Clone)]
pub struct FaceOutcome {
    pub result: MatchResult,
    /// Present only for accepted matches.
    pub attendance: Option<RecordOutcome>,
}

/// Totals for one run of the capture loop.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LoopSummary {
    pub frames: usize,
    pub dark_frames: usize,
    pub faces: usize,
    pub recorded: usize,
}

/// Everything needed to turn a frame into attendance records.
///
/// Owned by the single loop thread; nothing here is shared.
pub struct Session<E, M> {
    pub reference: ReferenceSet,
    pub extractor: E,
    pub matcher: M,
    pub threshold: f32,
    pub ledger: Ledger,
}

impl<E: FaceExtractor, M: Matcher> Session<E, M> {
    /// Extract, match and record every face in one frame.
    ///
    /// Extraction failures skip the frame; ledger failures are returned.
    pub fn process_frame(
        &mut self,
        image: &image::GrayImage,
        now: NaiveDateTime,
    ) -> Result<Vec<FaceOutcome>, LedgerError> {
        let faces = match self.extractor.extract(image) {
            Ok(faces) => faces,
            Err(e) => {
                tracing::warn!(error = %e, "extraction failed; frame skipped");
                return Ok(Vec::new());
            }
        };

        let mut outcomes = Vec::with_capacity(faces.len());
        for face in faces {
            let result = self
                .matcher
                .compare(&face.embedding, &self.reference, self.threshold);

            let attendance = match result.identity.as_deref() {
                Some(name) => {
                    let name = name.to_uppercase();
                    tracing::info!(name = %name, distance = result.distance, "match");
                    Some(self.ledger.record_attendance(&name, now)?)
                }
                None => {
                    tracing::info!(
                        nearest = ?result.nearest,
                        distance = result.distance,
                        "no match"
                    );
                    None
                }
            };

            outcomes.push(FaceOutcome { result, attendance });
        }
        Ok(outcomes)
    }
}

/// Pull frames until cancelled or the source fails.
///
/// Cancellation is checked once per iteration, before the next frame is
/// requested; a frame in progress is always finished.
pub fn run_loop<S, E, M, C>(
    source: &mut S,
    session: &mut Session<E, M>,
    cancel: &AtomicBool,
    mut clock: C,
) -> Result<LoopSummary, EngineError>
where
    S: FrameSource,
    E: FaceExtractor,
    M: Matcher,
    C: FnMut() -> NaiveDateTime,
{
    let mut summary = LoopSummary::default();

    while !cancel.load(Ordering::Relaxed) {
        let frame = source.next_frame()?;
        summary.frames += 1;

        if frame.is_dark {
            summary.dark_frames += 1;
            tracing::debug!(
                seq = frame.sequence,
                brightness = frame.avg_brightness(),
                "skipping dark frame"
            );
            continue;
        }

        let seq = frame.sequence;
        let Some(image) = frame.into_image() else {
            tracing::warn!(seq, "frame buffer does not match its dimensions; skipped");
            continue;
        };

        let outcomes = session.process_frame(&image, clock())?;
        summary.faces += outcomes.len();
        summary.recorded += outcomes
            .iter()
            .filter(|o| o.attendance.as_ref().is_some_and(RecordOutcome::is_new))
            .count();
    }

    tracing::info!(?summary, "capture loop stopped");
    Ok(summary)
}

/// Discard `count` frames so exposure can settle. Read failures are fatal here too.
pub fn warm_up<S: FrameSource>(source: &mut S, count: usize) -> Result<(), CameraError> {
    if count > 0 {
        tracing::info!(count, "discarding warmup frames");
    }
    for _ in 0..count {
        source.next_frame()?;
    }
    Ok(())
}

/// Build the reference set, open the ledger and camera, then capture until
/// `cancel` is set or the camera fails.
///
/// The reference set is complete before the camera is opened. The camera is
/// released on every exit path.
pub fn run(config: &Config, cancel: &AtomicBool) -> Result<LoopSummary, EngineError> {
    let mut extractor = OnnxExtractor::load(&config.model_dir, config.preprocess())?;

    let report = build_reference_set(&config.enrollment_dir, &mut extractor)?;
    for skipped in &report.skipped {
        tracing::warn!(path = %skipped.path.display(), reason = %skipped.reason, "asset skipped");
    }
    tracing::info!(
        identities = report.reference.len(),
        skipped = report.skipped.len(),
        names = ?report.reference.names().collect::<Vec<_>>(),
        "reference set ready"
    );
    if report.reference.is_empty() {
        tracing::warn!("reference set is empty; every face will be Unknown");
    }

    let ledger = Ledger::open(&config.ledger_path)?;
    let mut session = Session {
        reference: report.reference,
        extractor,
        matcher: NearestNeighborMatcher::new(config.metric),
        threshold: config.threshold,
        ledger,
    };

    let camera = Camera::open(&config.camera_path())?;
    let mut stream = camera.stream()?;
    warm_up(&mut stream, config.warmup_frames)?;

    tracing::info!(
        device = %camera.device_path,
        threshold = config.threshold,
        metric = %config.metric,
        "capture loop running"
    );
    run_loop(&mut stream, &mut session, cancel, || {
        chrono::Local::now().naive_local()
    })
}
