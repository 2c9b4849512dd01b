//! Per-face tracking across frames.
//!
//! A [`TrackingSession`] owns one state machine per tracked face and drives
//! its observer with each frame's detections:
//!
//! ```text
//! New ──► Active ◄──► Missing ──(gap exceeded)──► Done
//! ```
//!
//! Detections without a detector-assigned id are matched to live tracks by
//! bounding-box overlap.

use crate::graphic::{Decorations, FaceGraphic, GraphicStyle};
use crate::overlay::GraphicOverlay;
use crate::palette::Palette;
use crate::types::Face;
use std::collections::{BTreeMap, HashSet};
use std::marker::PhantomData;

/// Consecutive frames a face may go undetected before its track ends.
pub const DEFAULT_MAX_MISSING_FRAMES: u32 = 3;
/// Minimum IoU for an id-less detection to continue an existing track.
pub const DEFAULT_MATCH_IOU: f32 = 0.3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TrackState {
    New,
    Active,
    Missing,
    Done,
}

/// Receives lifecycle events for one tracked face. `C` is the session owner's
/// context (typically the overlay being drawn).
pub trait TrackObserver<C> {
    fn on_enter(&mut self, ctx: &mut C, id: u32, state: TrackState);

    /// Called once per frame while the track is live: `Some` when the face was
    /// detected in this frame, `None` while it is missing.
    fn on_frame(&mut self, ctx: &mut C, id: u32, face: Option<&Face>);
}

/// Creates an observer for each newly seen face.
pub trait TrackerFactory<C> {
    type Observer: TrackObserver<C>;

    fn create(&mut self, face: &Face) -> Self::Observer;
}

struct Track<O> {
    state: TrackState,
    observer: O,
    last: Face,
    missing_frames: u32,
}

pub struct TrackingSession<C, F: TrackerFactory<C>> {
    factory: F,
    tracks: BTreeMap<u32, Track<F::Observer>>,
    next_id: u32,
    max_missing_frames: u32,
    match_iou: f32,
    _ctx: PhantomData<fn(&mut C)>,
}

impl<C, F: TrackerFactory<C>> TrackingSession<C, F> {
    pub fn new(factory: F) -> Self {
        Self {
            factory,
            tracks: BTreeMap::new(),
            next_id: 0,
            max_missing_frames: DEFAULT_MAX_MISSING_FRAMES,
            match_iou: DEFAULT_MATCH_IOU,
            _ctx: PhantomData,
        }
    }

    pub fn with_max_missing_frames(mut self, frames: u32) -> Self {
        self.max_missing_frames = frames;
        self
    }

    pub fn with_match_iou(mut self, iou: f32) -> Self {
        self.match_iou = iou;
        self
    }

    pub fn state(&self, id: u32) -> Option<TrackState> {
        self.tracks.get(&id).map(|t| t.state)
    }

    /// Ids of live (not yet done) tracks, ascending.
    pub fn live_ids(&self) -> Vec<u32> {
        self.tracks.keys().copied().collect()
    }

    pub fn factory(&self) -> &F {
        &self.factory
    }

    /// Advance every track by one frame. Returns the detections with their
    /// track ids filled in.
    pub fn process(&mut self, ctx: &mut C, detections: &[Face]) -> Vec<Face> {
        let faces = self.assign_ids(detections);
        let mut seen = HashSet::with_capacity(faces.len());

        for face in &faces {
            let Some(id) = face.id else { continue };
            seen.insert(id);

            match self.tracks.get_mut(&id) {
                Some(track) => {
                    track.missing_frames = 0;
                    track.last = face.clone();
                    if track.state == TrackState::Missing {
                        track.state = TrackState::Active;
                        track.observer.on_enter(ctx, id, TrackState::Active);
                    }
                    track.observer.on_frame(ctx, id, Some(face));
                }
                None => {
                    let mut observer = self.factory.create(face);
                    observer.on_enter(ctx, id, TrackState::New);
                    observer.on_frame(ctx, id, Some(face));
                    observer.on_enter(ctx, id, TrackState::Active);
                    tracing::debug!(id, "track started");
                    self.tracks.insert(
                        id,
                        Track {
                            state: TrackState::Active,
                            observer,
                            last: face.clone(),
                            missing_frames: 0,
                        },
                    );
                }
            }
        }

        let mut done = Vec::new();
        for (&id, track) in self.tracks.iter_mut() {
            if seen.contains(&id) {
                continue;
            }
            track.missing_frames += 1;
            if track.state != TrackState::Missing {
                track.state = TrackState::Missing;
                track.observer.on_enter(ctx, id, TrackState::Missing);
            }
            if track.missing_frames > self.max_missing_frames {
                track.state = TrackState::Done;
                track.observer.on_enter(ctx, id, TrackState::Done);
                done.push(id);
            } else {
                track.observer.on_frame(ctx, id, None);
            }
        }
        for id in done {
            self.tracks.remove(&id);
            tracing::debug!(id, "track done");
        }

        faces
    }

    /// End every live track.
    pub fn finish(&mut self, ctx: &mut C) {
        for (id, mut track) in std::mem::take(&mut self.tracks) {
            track.state = TrackState::Done;
            track.observer.on_enter(ctx, id, TrackState::Done);
        }
    }

    /// Keep detector ids; give id-less detections the best-overlapping free
    /// track, or a fresh id.
    fn assign_ids(&mut self, detections: &[Face]) -> Vec<Face> {
        let mut faces = detections.to_vec();
        let mut claimed: HashSet<u32> = faces.iter().filter_map(|f| f.id).collect();

        let mut candidates = Vec::new();
        for (idx, face) in faces.iter().enumerate() {
            if face.id.is_some() {
                continue;
            }
            for (&id, track) in &self.tracks {
                if claimed.contains(&id) {
                    continue;
                }
                let overlap = face.iou(&track.last);
                if overlap >= self.match_iou {
                    candidates.push((idx, id, overlap));
                }
            }
        }
        candidates.sort_by(|a, b| b.2.partial_cmp(&a.2).unwrap_or(std::cmp::Ordering::Equal));

        for (idx, id, _) in candidates {
            if faces[idx].id.is_none() && !claimed.contains(&id) {
                faces[idx].id = Some(id);
                claimed.insert(id);
            }
        }

        for face in faces.iter_mut().filter(|f| f.id.is_none()) {
            while self.tracks.contains_key(&self.next_id) || claimed.contains(&self.next_id) {
                self.next_id = self.next_id.wrapping_add(1);
            }
            face.id = Some(self.next_id);
            claimed.insert(self.next_id);
            self.next_id = self.next_id.wrapping_add(1);
        }

        faces
    }
}

/// Keeps one [`FaceGraphic`] on the overlay in step with its track.
#[derive(Debug, Clone)]
pub struct GraphicTracker {
    graphic: FaceGraphic,
}

impl GraphicTracker {
    pub fn new(graphic: FaceGraphic) -> Self {
        Self { graphic }
    }

    pub fn graphic(&self) -> &FaceGraphic {
        &self.graphic
    }
}

impl TrackObserver<GraphicOverlay> for GraphicTracker {
    fn on_enter(&mut self, overlay: &mut GraphicOverlay, id: u32, state: TrackState) {
        match state {
            TrackState::New => self.graphic.set_id(id),
            TrackState::Done => {
                overlay.remove(id);
            }
            TrackState::Active | TrackState::Missing => {}
        }
    }

    fn on_frame(&mut self, overlay: &mut GraphicOverlay, id: u32, face: Option<&Face>) {
        match face {
            Some(face) => {
                self.graphic.set_rotation(face.euler_z);
                self.graphic.update_face(face.clone());
                overlay.add(self.graphic.clone());
            }
            // Hidden while missing; it comes back if the face reappears.
            None => {
                overlay.remove(id);
            }
        }
    }
}

/// Builds [`GraphicTracker`]s, handing each a colour from its own palette.
#[derive(Debug, Clone, Default)]
pub struct GraphicTrackerFactory {
    palette: Palette,
    style: GraphicStyle,
    decorations: Decorations,
}

impl GraphicTrackerFactory {
    pub fn new(style: GraphicStyle, decorations: Decorations) -> Self {
        Self {
            palette: Palette::new(),
            style,
            decorations,
        }
    }
}

impl TrackerFactory<GraphicOverlay> for GraphicTrackerFactory {
    type Observer = GraphicTracker;

    fn create(&mut self, _face: &Face) -> GraphicTracker {
        let mut graphic = FaceGraphic::new(0, &mut self.palette);
        graphic.set_style(self.style);
        graphic.set_decorations(self.decorations.clone());
        GraphicTracker::new(graphic)
    }
}
