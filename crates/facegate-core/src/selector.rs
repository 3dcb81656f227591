//! Bounded capture loop that keeps the single best face seen in a window.
//!
//! The loop is a cooperative poll: one frame per iteration, deadline checked
//! once per iteration, cancellation observed through a [`CancelToken`].

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use image::{imageops, RgbImage};
use tracing::{debug, info, warn};

use crate::capture::FrameSource;
use crate::display::FrameDisplay;
use crate::errors::AppResult;
use crate::provider::{EmbeddingProvider, FaceRegion};

pub const DEFAULT_CAPTURE_WINDOW: Duration = Duration::from_secs(15);

#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SelectionPolicy {
    /// Score is the number of faces in a frame; the first face of the
    /// best-scoring frame is kept. Used when authenticating.
    MostFaces,
    /// Score is the area of each individual face across every frame. Used
    /// when enrolling.
    LargestFace,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SelectorState {
    Capturing,
    Selecting,
    Done,
}

#[derive(Debug, Clone)]
pub struct Selection {
    /// The face cropped out of the frame it was observed in.
    pub image: RgbImage,
    pub region: FaceRegion,
    pub score: i64,
    pub frame_index: usize,
}

#[derive(Debug, Clone)]
pub struct CaptureReport {
    pub selection: Option<Selection>,
    pub frames_captured: usize,
    pub frames_skipped: usize,
    pub cancelled: bool,
}

struct Candidate {
    frame: RgbImage,
    region: FaceRegion,
    score: i64,
    frame_index: usize,
}

/// Transient per-invocation state of one capture loop.
pub struct CaptureWindow {
    policy: SelectionPolicy,
    started: Instant,
    length: Duration,
    state: SelectorState,
    best: Option<Candidate>,
    frames_captured: usize,
    frames_skipped: usize,
    cancelled: bool,
}

impl CaptureWindow {
    pub fn new(policy: SelectionPolicy, length: Duration) -> Self {
        Self {
            policy,
            started: Instant::now(),
            length,
            state: SelectorState::Capturing,
            best: None,
            frames_captured: 0,
            frames_skipped: 0,
            cancelled: false,
        }
    }

    pub fn state(&self) -> SelectorState {
        self.state
    }

    pub fn best_score(&self) -> Option<i64> {
        self.best.as_ref().map(|candidate| candidate.score)
    }

    fn expired(&self) -> bool {
        self.started.elapsed() >= self.length
    }

    /// Scores one frame and keeps it if it beats the running best.
    /// Returns true when the frame became the new best.
    pub fn observe(&mut self, frame: RgbImage, regions: &[FaceRegion]) -> bool {
        let frame_index = self.frames_captured;
        self.frames_captured += 1;

        let running = self.best_score().unwrap_or(0);
        let pick = match self.policy {
            SelectionPolicy::MostFaces => {
                let count = regions.len() as i64;
                regions
                    .first()
                    .filter(|_| count > running)
                    .map(|region| (*region, count))
            }
            SelectionPolicy::LargestFace => regions
                .iter()
                .fold(None, |best: Option<(FaceRegion, i64)>, region| {
                    let area = region.area();
                    let floor = best.map_or(running, |(_, score)| score);
                    if area > floor {
                        Some((*region, area))
                    } else {
                        best
                    }
                }),
        };

        match pick {
            Some((region, score)) => {
                self.best = Some(Candidate {
                    frame,
                    region,
                    score,
                    frame_index,
                });
                true
            }
            None => false,
        }
    }

    pub fn skip(&mut self) {
        self.frames_skipped += 1;
    }

    fn begin_selecting(&mut self, cancelled: bool) {
        self.cancelled = cancelled;
        self.state = SelectorState::Selecting;
    }

    fn finish(mut self) -> CaptureReport {
        let selection = self.best.take().and_then(|candidate| {
            let bounds = candidate
                .region
                .clamp_to(candidate.frame.width(), candidate.frame.height())?;
            let image = imageops::crop_imm(
                &candidate.frame,
                bounds.left as u32,
                bounds.top as u32,
                bounds.width() as u32,
                bounds.height() as u32,
            )
            .to_image();
            Some(Selection {
                image,
                region: candidate.region,
                score: candidate.score,
                frame_index: candidate.frame_index,
            })
        });
        self.state = SelectorState::Done;

        CaptureReport {
            selection,
            frames_captured: self.frames_captured,
            frames_skipped: self.frames_skipped,
            cancelled: self.cancelled,
        }
    }
}

pub struct BestFrameSelector<P> {
    provider: P,
    policy: SelectionPolicy,
    window: Duration,
}

impl<P: EmbeddingProvider> BestFrameSelector<P> {
    pub fn new(provider: P, policy: SelectionPolicy, window: Duration) -> Self {
        Self {
            provider,
            policy,
            window,
        }
    }

    pub fn run(
        &self,
        source: &mut dyn FrameSource,
        display: &mut dyn FrameDisplay,
        cancel: &CancelToken,
    ) -> CaptureReport {
        let mut window = CaptureWindow::new(self.policy, self.window);

        while window.state() == SelectorState::Capturing {
            if cancel.is_cancelled() {
                window.begin_selecting(true);
                break;
            }
            if window.expired() {
                window.begin_selecting(false);
                break;
            }

            let frame = match source.read_frame() {
                Ok(Some(frame)) => frame,
                Ok(None) => {
                    window.skip();
                    continue;
                }
                Err(err) => {
                    warn!("skipping unreadable frame: {err}");
                    window.skip();
                    continue;
                }
            };

            let regions = match self.detect(&frame) {
                Ok(regions) => regions,
                Err(err) => {
                    warn!("face detection failed on frame; skipping: {err}");
                    display.render(&frame, &[]);
                    window.skip();
                    continue;
                }
            };

            display.render(&frame, &regions);
            if window.observe(frame, &regions) {
                debug!(
                    policy = ?self.policy,
                    faces = regions.len(),
                    score = window.best_score().unwrap_or_default(),
                    "new best candidate"
                );
            }
        }

        let report = window.finish();
        info!(
            policy = ?self.policy,
            frames = report.frames_captured,
            skipped = report.frames_skipped,
            cancelled = report.cancelled,
            found = report.selection.is_some(),
            "capture window closed"
        );
        report
    }

    fn detect(&self, frame: &RgbImage) -> AppResult<Vec<FaceRegion>> {
        self.provider.detect_faces(frame)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::display::NullDisplay;
    use crate::errors::AppError;
    use crate::provider::Embedding;
    use image::Rgb;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    /// Frames carry their index in the red channel of pixel (0, 0); the
    /// provider looks the detections up by that index.
    struct IndexedProvider {
        detections: Vec<Vec<FaceRegion>>,
    }

    impl EmbeddingProvider for IndexedProvider {
        fn detect_faces(&self, image: &RgbImage) -> AppResult<Vec<FaceRegion>> {
            let index = image.get_pixel(0, 0)[0] as usize;
            self.detections
                .get(index)
                .cloned()
                .ok_or_else(|| AppError::FrameProcessing("unknown frame".into()))
        }

        fn encode(&self, _image: &RgbImage, regions: &[FaceRegion]) -> AppResult<Vec<Embedding>> {
            Ok(regions.iter().map(|_| Embedding::new(vec![1.0])).collect())
        }
    }

    /// Yields its frames, then cancels the run so tests never wait on the clock.
    struct ScriptedSource {
        frames: Mutex<VecDeque<AppResult<Option<RgbImage>>>>,
        cancel: CancelToken,
    }

    impl ScriptedSource {
        fn new(frames: Vec<AppResult<Option<RgbImage>>>, cancel: &CancelToken) -> Self {
            Self {
                frames: Mutex::new(frames.into()),
                cancel: cancel.clone(),
            }
        }
    }

    impl FrameSource for ScriptedSource {
        fn read_frame(&mut self) -> AppResult<Option<RgbImage>> {
            let next = self.frames.lock().unwrap().pop_front();
            match next {
                Some(frame) => frame,
                None => {
                    self.cancel.cancel();
                    Ok(None)
                }
            }
        }
    }

    fn frame(index: u8, size: u32) -> RgbImage {
        let mut image = RgbImage::from_pixel(size, size, Rgb([0, 0, 200]));
        image.put_pixel(0, 0, Rgb([index, 0, 0]));
        image
    }

    fn run(
        policy: SelectionPolicy,
        detections: Vec<Vec<FaceRegion>>,
        frames: Vec<AppResult<Option<RgbImage>>>,
    ) -> CaptureReport {
        let cancel = CancelToken::new();
        let mut source = ScriptedSource::new(frames, &cancel);
        let selector = BestFrameSelector::new(
            IndexedProvider { detections },
            policy,
            Duration::from_secs(60),
        );
        selector.run(&mut source, &mut NullDisplay, &cancel)
    }

    #[test]
    fn most_faces_picks_the_frame_with_the_highest_count() {
        let detections = vec![
            vec![],
            vec![FaceRegion::new(2, 2, 6, 6), FaceRegion::new(10, 10, 18, 18)],
            vec![FaceRegion::new(4, 4, 12, 12)],
        ];
        let frames = (0..3).map(|i| Ok(Some(frame(i, 20)))).collect();

        let report = run(SelectionPolicy::MostFaces, detections, frames);
        let selection = report.selection.expect("a face was seen");
        assert_eq!(selection.frame_index, 1);
        assert_eq!(selection.score, 2);
        assert_eq!(selection.region, FaceRegion::new(2, 2, 6, 6));
        assert_eq!(selection.image.dimensions(), (4, 4));
        assert_eq!(report.frames_captured, 3);
        assert!(report.cancelled);
    }

    #[test]
    fn most_faces_keeps_the_earlier_frame_on_ties() {
        let detections = vec![
            vec![FaceRegion::new(0, 0, 4, 4)],
            vec![FaceRegion::new(8, 8, 16, 16)],
        ];
        let frames = (0..2).map(|i| Ok(Some(frame(i, 20)))).collect();

        let report = run(SelectionPolicy::MostFaces, detections, frames);
        assert_eq!(report.selection.unwrap().frame_index, 0);
    }

    #[test]
    fn largest_face_compares_individual_regions_across_frames() {
        let detections = vec![
            vec![FaceRegion::new(0, 0, 10, 10)],
            vec![FaceRegion::new(1, 1, 5, 5), FaceRegion::new(20, 20, 40, 40)],
            vec![
                FaceRegion::new(0, 0, 10, 25),
                FaceRegion::new(30, 0, 35, 5),
                FaceRegion::new(30, 30, 32, 32),
            ],
        ];
        let frames = (0..3).map(|i| Ok(Some(frame(i, 50)))).collect();

        let report = run(SelectionPolicy::LargestFace, detections, frames);
        let selection = report.selection.unwrap();
        assert_eq!(selection.score, 400);
        assert_eq!(selection.frame_index, 1);
        assert_eq!(selection.region, FaceRegion::new(20, 20, 40, 40));
        assert_eq!(selection.image.dimensions(), (20, 20));
    }

    #[test]
    fn unreadable_frames_are_skipped_not_fatal() {
        let detections = vec![vec![], vec![FaceRegion::new(0, 0, 4, 4)]];
        let frames = vec![
            Err(AppError::FrameProcessing("corrupt".into())),
            Ok(None),
            Ok(Some(frame(7, 8))),
            Ok(Some(frame(1, 8))),
        ];

        let report = run(SelectionPolicy::MostFaces, detections, frames);
        assert_eq!(report.frames_skipped, 4);
        assert_eq!(report.frames_captured, 1);
        assert!(report.selection.is_some());
    }

    #[derive(Default)]
    struct CountingDisplay {
        rendered: Vec<usize>,
    }

    impl FrameDisplay for CountingDisplay {
        fn render(&mut self, _frame: &RgbImage, regions: &[FaceRegion]) {
            self.rendered.push(regions.len());
        }

        fn show_result(&mut self, _image: &RgbImage, _authenticated: bool) {}
    }

    #[test]
    fn frames_whose_detection_fails_are_still_rendered() {
        let cancel = CancelToken::new();
        let frames = vec![Ok(Some(frame(9, 8))), Ok(Some(frame(0, 8)))];
        let mut source = ScriptedSource::new(frames, &cancel);
        let selector = BestFrameSelector::new(
            IndexedProvider {
                detections: vec![vec![FaceRegion::new(0, 0, 4, 4)]],
            },
            SelectionPolicy::MostFaces,
            Duration::from_secs(60),
        );
        let mut display = CountingDisplay::default();

        let report = selector.run(&mut source, &mut display, &cancel);
        assert_eq!(display.rendered, vec![0, 1]);
        assert_eq!(report.frames_captured, 1);
        assert!(report.selection.is_some());
    }

    #[test]
    fn window_without_faces_selects_nothing() {
        let detections = vec![vec![], vec![]];
        let frames = (0..2).map(|i| Ok(Some(frame(i, 8)))).collect();

        let report = run(SelectionPolicy::LargestFace, detections, frames);
        assert!(report.selection.is_none());
        assert_eq!(report.frames_captured, 2);
    }

    #[test]
    fn deadline_closes_the_window_without_a_cancel_signal() {
        struct Blank;
        impl FrameSource for Blank {
            fn read_frame(&mut self) -> AppResult<Option<RgbImage>> {
                Ok(None)
            }
        }

        let selector = BestFrameSelector::new(
            IndexedProvider { detections: vec![] },
            SelectionPolicy::MostFaces,
            Duration::from_millis(30),
        );
        let report = selector.run(&mut Blank, &mut NullDisplay, &CancelToken::new());
        assert!(!report.cancelled);
        assert!(report.selection.is_none());
    }

    #[test]
    fn window_walks_through_its_states() {
        let mut window = CaptureWindow::new(SelectionPolicy::MostFaces, Duration::from_secs(1));
        assert_eq!(window.state(), SelectorState::Capturing);
        assert!(window.observe(frame(0, 8), &[FaceRegion::new(0, 0, 2, 2)]));
        window.begin_selecting(false);
        assert_eq!(window.state(), SelectorState::Selecting);
        let report = window.finish();
        assert_eq!(report.selection.unwrap().image.dimensions(), (2, 2));
    }
}
