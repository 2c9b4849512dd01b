//! Detector-space to view-space mapping, and the overlay that owns face graphics.

use crate::graphic::FaceGraphic;
use crate::types::Facing;
use image::imageops::FilterType;
use image::{DynamicImage, RgbaImage};
use std::collections::BTreeMap;

/// Independent x/y scale from detector space to view space, plus the mirroring flag.
///
/// Only valid for the frame/view size pair it was derived from.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CoordinateTransform {
    scale_x: f32,
    scale_y: f32,
    facing: Facing,
    view_width: f32,
}

impl CoordinateTransform {
    /// Stretch `frame_width × frame_height` onto `view_width × view_height`.
    ///
    /// A non-positive dimension leaves that axis unscaled.
    pub fn derive(frame_width: f32, frame_height: f32, view_width: f32, view_height: f32) -> Self {
        Self {
            scale_x: axis_scale(view_width, frame_width),
            scale_y: axis_scale(view_height, frame_height),
            facing: Facing::Back,
            view_width: view_width.max(0.0),
        }
    }

    pub fn with_facing(mut self, facing: Facing) -> Self {
        self.facing = facing;
        self
    }

    pub fn factors(&self) -> (f32, f32) {
        (self.scale_x, self.scale_y)
    }

    pub fn facing(&self) -> Facing {
        self.facing
    }

    /// Scale a detector-space point into view space. No mirroring.
    pub fn map_point(&self, x: f32, y: f32) -> (f32, f32) {
        (x * self.scale_x, y * self.scale_y)
    }

    /// Scale a horizontal length.
    pub fn scale_x(&self, len: f32) -> f32 {
        len * self.scale_x
    }

    /// Scale a vertical length.
    pub fn scale_y(&self, len: f32) -> f32 {
        len * self.scale_y
    }

    /// Horizontal position in view space, mirrored for front-facing sources.
    pub fn translate_x(&self, x: f32) -> f32 {
        if self.facing.is_mirrored() {
            self.view_width - self.scale_x(x)
        } else {
            self.scale_x(x)
        }
    }

    pub fn translate_y(&self, y: f32) -> f32 {
        self.scale_y(y)
    }
}

fn axis_scale(view: f32, frame: f32) -> f32 {
    if frame > 0.0 && view > 0.0 {
        view / frame
    } else {
        1.0
    }
}

/// View-sized drawing surface state: the current detector frame geometry and
/// the graphics of every visible face, keyed by track id.
#[derive(Debug, Clone)]
pub struct GraphicOverlay {
    view_width: u32,
    view_height: u32,
    frame_width: u32,
    frame_height: u32,
    facing: Facing,
    graphics: BTreeMap<u32, FaceGraphic>,
}

impl GraphicOverlay {
    pub fn new(view_width: u32, view_height: u32) -> Self {
        Self {
            view_width,
            view_height,
            frame_width: view_width,
            frame_height: view_height,
            facing: Facing::Back,
            graphics: BTreeMap::new(),
        }
    }

    /// Record the size and facing of the frames the detector is seeing.
    pub fn set_frame_info(&mut self, frame_width: u32, frame_height: u32, facing: Facing) {
        self.frame_width = frame_width;
        self.frame_height = frame_height;
        self.facing = facing;
    }

    pub fn resize_view(&mut self, view_width: u32, view_height: u32) {
        self.view_width = view_width;
        self.view_height = view_height;
    }

    pub fn view_size(&self) -> (u32, u32) {
        (self.view_width, self.view_height)
    }

    /// Add or replace the graphic for its track id.
    pub fn add(&mut self, graphic: FaceGraphic) {
        self.graphics.insert(graphic.id(), graphic);
    }

    pub fn remove(&mut self, id: u32) -> Option<FaceGraphic> {
        self.graphics.remove(&id)
    }

    pub fn clear(&mut self) {
        self.graphics.clear();
    }

    pub fn len(&self) -> usize {
        self.graphics.len()
    }

    pub fn is_empty(&self) -> bool {
        self.graphics.is_empty()
    }

    pub fn contains(&self, id: u32) -> bool {
        self.graphics.contains_key(&id)
    }

    pub fn graphics(&self) -> impl Iterator<Item = &FaceGraphic> {
        self.graphics.values()
    }

    /// Derived fresh on every call from the current frame and view sizes.
    pub fn transform(&self) -> CoordinateTransform {
        CoordinateTransform::derive(
            self.frame_width as f32,
            self.frame_height as f32,
            self.view_width as f32,
            self.view_height as f32,
        )
        .with_facing(self.facing)
    }

    /// Draw every graphic onto a view-sized canvas.
    pub fn draw(&self, canvas: &mut RgbaImage) {
        let transform = self.transform();
        for graphic in self.graphics.values() {
            graphic.draw(canvas, &transform);
        }
    }

    /// Render the graphics alone on a transparent view-sized layer.
    pub fn render(&self) -> RgbaImage {
        let mut layer = RgbaImage::new(self.view_width, self.view_height);
        self.draw(&mut layer);
        layer
    }

    /// Paint the overlay onto a photo of any size, stretching view space to photo space.
    pub fn composite(&self, photo: &DynamicImage) -> RgbaImage {
        let mut out = photo.to_rgba8();
        let (width, height) = out.dimensions();
        let layer = self.render();

        if (width, height) == (self.view_width, self.view_height) {
            image::imageops::overlay(&mut out, &layer, 0, 0);
        } else {
            tracing::debug!(
                from = ?(self.view_width, self.view_height),
                to = ?(width, height),
                "scaling overlay to photo"
            );
            let scaled = image::imageops::resize(&layer, width, height, FilterType::Triangle);
            image::imageops::overlay(&mut out, &scaled, 0, 0);
        }
        out
    }
}
