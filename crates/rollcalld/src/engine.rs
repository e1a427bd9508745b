use rollcall_core::{AnalyzeError, BoundingBox, Embedding, FaceAnalyzer, FaceSample};
use rollcall_hw::{CameraError, FrameSource};
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("camera error: {0}")]
    Camera(#[from] CameraError),
    #[error("analysis error: {0}")]
    Analyze(#[from] AnalyzeError),
    #[error("no face detected in {frames_examined} frames")]
    NoFaceDetected { frames_examined: usize },
    #[error("captured embedding is unusable (dimension {dim})")]
    InvalidEmbedding { dim: usize },
    #[error("failed to start engine thread: {0}")]
    Spawn(std::io::Error),
    #[error("engine thread exited")]
    ChannelClosed,
}

/// How a capture polls the frame source.
#[derive(Debug, Clone, Copy)]
pub struct CaptureSettings {
    pub frames_per_capture: usize,
    pub timeout: Duration,
    pub poll_interval: Duration,
}

/// The best face found during one capture.
#[derive(Debug, Clone)]
pub struct CaptureResult {
    pub embedding: Embedding,
    pub face: BoundingBox,
    /// Detection confidence of the chosen face.
    pub quality: f32,
    pub frames_examined: usize,
    pub dark_skipped: usize,
}

/// Messages sent from the kiosk to the engine thread.
enum EngineRequest {
    Capture {
        reply: oneshot::Sender<Result<CaptureResult, EngineError>>,
    },
}

/// Clone-safe handle to the engine thread.
#[derive(Clone)]
pub struct EngineHandle {
    tx: mpsc::Sender<EngineRequest>,
    source: String,
}

impl EngineHandle {
    /// Wait for a face in front of the camera and embed it.
    pub async fn capture(&self) -> Result<CaptureResult, EngineError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(EngineRequest::Capture { reply: reply_tx })
            .await
            .map_err(|_| EngineError::ChannelClosed)?;
        reply_rx.await.map_err(|_| EngineError::ChannelClosed)?
    }

    /// Description of the frame source the engine reads from.
    pub fn source(&self) -> &str {
        &self.source
    }
}

/// Spawn the engine on a dedicated OS thread.
///
/// The source and analyzer are opened by the caller so startup fails fast
/// when the camera or models are unavailable.
pub fn spawn_engine(
    mut source: Box<dyn FrameSource>,
    mut analyzer: Box<dyn FaceAnalyzer + Send>,
    settings: CaptureSettings,
    warmup_frames: usize,
) -> Result<EngineHandle, EngineError> {
    let description = source.describe();

    // Discard warmup frames for camera AGC/AE stabilization
    if warmup_frames > 0 {
        tracing::info!(count = warmup_frames, "discarding warmup frames");
        if let Err(e) = source.capture(warmup_frames) {
            tracing::warn!(error = %e, "warmup capture failed");
        }
    }

    let (tx, mut rx) = mpsc::channel::<EngineRequest>(4);

    std::thread::Builder::new()
        .name("rollcall-engine".into())
        .spawn(move || {
            tracing::info!("engine thread started");
            while let Some(req) = rx.blocking_recv() {
                match req {
                    EngineRequest::Capture { reply } => {
                        let result = run_capture(source.as_mut(), analyzer.as_mut(), &settings);
                        let _ = reply.send(result);
                    }
                }
            }
            tracing::info!("engine thread exiting");
        })
        .map_err(EngineError::Spawn)?;

    Ok(EngineHandle {
        tx,
        source: description,
    })
}

/// Poll the source until a usable face appears or the timeout passes.
/// Within a batch the most confident face wins.
fn run_capture(
    source: &mut dyn FrameSource,
    analyzer: &mut (dyn FaceAnalyzer + Send),
    settings: &CaptureSettings,
) -> Result<CaptureResult, EngineError> {
    let started = Instant::now();
    let deadline = started + settings.timeout;
    let mut frames_examined = 0;
    let mut dark_skipped = 0;

    loop {
        let batch = source.capture(settings.frames_per_capture)?;
        frames_examined += batch.frames.len();
        dark_skipped += batch.dark_skipped;

        let mut best: Option<FaceSample> = None;
        for frame in &batch.frames {
            let Some(sample) = analyzer.analyze(&frame.image)? else {
                continue;
            };
            let is_better = match &best {
                None => true,
                Some(prev) => sample.face.confidence > prev.face.confidence,
            };
            if is_better {
                best = Some(sample);
            }
        }

        if let Some(sample) = best {
            tracing::info!(
                confidence = sample.face.confidence,
                frames_examined,
                dark_skipped,
                elapsed_ms = started.elapsed().as_millis() as u64,
                "capture: face selected"
            );
            return Ok(CaptureResult {
                quality: sample.face.confidence,
                embedding: sample.embedding,
                face: sample.face,
                frames_examined,
                dark_skipped,
            });
        }

        let now = Instant::now();
        if now >= deadline {
            tracing::info!(frames_examined, dark_skipped, "capture: timed out without a face");
            return Err(EngineError::NoFaceDetected { frames_examined });
        }
        tracing::trace!(frames_examined, "capture: no face yet");
        std::thread::sleep(settings.poll_interval.min(deadline - now));
    }
}
