//! Per-face overlay graphic: position marker, bounding box, landmarks and
//! decorative bitmaps anchored to the face geometry.

use crate::overlay::CoordinateTransform;
use crate::palette::{self, Palette};
use crate::types::Face;
use image::imageops::FilterType;
use image::{Rgba, RgbaImage};
use imageproc::drawing::{draw_filled_circle_mut, draw_hollow_circle_mut, draw_hollow_rect_mut};
use imageproc::rect::Rect;
use std::sync::Arc;

const FACE_POSITION_RADIUS: i32 = 10;
const LANDMARK_RADIUS: i32 = 10;
const BOX_STROKE_WIDTH: u32 = 5;
const LANDMARK_COLOR: Rgba<u8> = palette::GREEN;

// Decoration anchoring, in view pixels.
const HAND_X_OFFSET: f32 = -610.0;
const HAND_Y_OFFSET: f32 = -30.0;
const FEED_SMILE_THRESHOLD: f32 = 0.2;
const SHOULDER_ROTATION_DEGREES: f32 = 10.0;

/// Which annotations a graphic draws.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GraphicStyle {
    pub position: bool,
    pub bounding_box: bool,
    pub landmarks: bool,
}

impl Default for GraphicStyle {
    fn default() -> Self {
        Self {
            position: true,
            bounding_box: true,
            landmarks: true,
        }
    }
}

/// Optional bitmaps drawn around the face.
#[derive(Debug, Clone, Default)]
pub struct Decorations {
    pub hand: Option<Arc<RgbaImage>>,
    pub feed: Option<Arc<RgbaImage>>,
    pub left_shoulder: Option<Arc<RgbaImage>>,
    pub right_shoulder: Option<Arc<RgbaImage>>,
}

#[derive(Debug, Clone)]
pub struct FaceGraphic {
    id: u32,
    color: Rgba<u8>,
    face: Option<Face>,
    rotation: f32,
    style: GraphicStyle,
    decorations: Decorations,
}

impl FaceGraphic {
    /// Takes the next colour from `palette`.
    pub fn new(id: u32, palette: &mut Palette) -> Self {
        Self {
            id,
            color: palette.next_color(),
            face: None,
            rotation: 0.0,
            style: GraphicStyle::default(),
            decorations: Decorations::default(),
        }
    }

    pub fn id(&self) -> u32 {
        self.id
    }

    pub fn set_id(&mut self, id: u32) {
        self.id = id;
    }

    pub fn color(&self) -> Rgba<u8> {
        self.color
    }

    pub fn face(&self) -> Option<&Face> {
        self.face.as_ref()
    }

    /// Replace the face with the most recent detection.
    pub fn update_face(&mut self, face: Face) {
        self.face = Some(face);
    }

    pub fn set_rotation(&mut self, degrees: f32) {
        self.rotation = degrees;
    }

    pub fn set_style(&mut self, style: GraphicStyle) {
        self.style = style;
    }

    pub fn set_decorations(&mut self, decorations: Decorations) {
        self.decorations = decorations;
    }

    pub fn set_hand(&mut self, bitmap: Arc<RgbaImage>) {
        self.decorations.hand = Some(bitmap);
    }

    pub fn set_feed(&mut self, bitmap: Arc<RgbaImage>) {
        self.decorations.feed = Some(bitmap);
    }

    pub fn set_shoulders(&mut self, left: Arc<RgbaImage>, right: Arc<RgbaImage>) {
        self.decorations.left_shoulder = Some(left);
        self.decorations.right_shoulder = Some(right);
    }

    /// Draw this face's annotations onto a view-space canvas.
    pub fn draw(&self, canvas: &mut RgbaImage, transform: &CoordinateTransform) {
        let Some(face) = &self.face else {
            return;
        };

        let (center_x, center_y) = face.center();
        let x = transform.translate_x(center_x);
        let y = transform.translate_y(center_y);

        let x_offset = transform.scale_x(face.width / 2.0);
        let y_offset = transform.scale_y(face.height / 2.0);
        let left = x - x_offset;
        let top = y - y_offset;
        let right = x + x_offset;
        let bottom = y + y_offset;

        if self.style.position {
            draw_filled_circle_mut(canvas, (x as i32, y as i32), FACE_POSITION_RADIUS, self.color);
        }

        if self.style.bounding_box {
            draw_box(canvas, left, top, right, bottom, self.color);
        }

        if self.style.landmarks {
            for landmark in &face.landmarks {
                let cx = transform.translate_x(landmark.x) as i32;
                let cy = transform.translate_y(landmark.y) as i32;
                draw_hollow_circle_mut(canvas, (cx, cy), LANDMARK_RADIUS, LANDMARK_COLOR);
            }
        }

        self.draw_decorations(canvas, face, left, top, right, bottom);
    }

    fn draw_decorations(
        &self,
        canvas: &mut RgbaImage,
        face: &Face,
        left: f32,
        top: f32,
        right: f32,
        bottom: f32,
    ) {
        let (canvas_w, canvas_h) = canvas.dimensions();

        if let Some(hand) = &self.decorations.hand {
            let hand_left = (left + HAND_X_OFFSET).min(0.0) as i64;
            let hand_top = (top + HAND_Y_OFFSET) as i64;
            image::imageops::overlay(canvas, &**hand, hand_left, hand_top);
        }

        if let Some(feed) = &self.decorations.feed {
            let smiling = face.smiling_probability.unwrap_or(0.0) > FEED_SMILE_THRESHOLD;
            if bottom >= (canvas_h / 2) as f32 && smiling {
                let feed_left = ((left + right) / 2.0) as i64;
                let feed_top = (bottom as i64).max(i64::from(canvas_h) - i64::from(feed.height()));
                image::imageops::overlay(canvas, &**feed, feed_left, feed_top);
            }
        }

        if self.rotation < -SHOULDER_ROTATION_DEGREES {
            if let Some(shoulder) = &self.decorations.left_shoulder {
                let scaled = fit_height(shoulder, canvas_h);
                image::imageops::overlay(canvas, &scaled, 0, 0);
            }
        }

        if self.rotation > SHOULDER_ROTATION_DEGREES {
            if let Some(shoulder) = &self.decorations.right_shoulder {
                let scaled = fit_height(shoulder, canvas_h);
                let x = i64::from(canvas_w) - i64::from(scaled.width());
                image::imageops::overlay(canvas, &scaled, x, 0);
            }
        }
    }
}

/// Hollow rectangle with a `BOX_STROKE_WIDTH` stroke growing inwards.
fn draw_box(canvas: &mut RgbaImage, left: f32, top: f32, right: f32, bottom: f32, color: Rgba<u8>) {
    let (l, t) = (left.round() as i32, top.round() as i32);
    let (w, h) = ((right - left).round() as i32, (bottom - top).round() as i32);

    for inset in 0..BOX_STROKE_WIDTH as i32 {
        let (iw, ih) = (w - 2 * inset, h - 2 * inset);
        if iw <= 0 || ih <= 0 {
            break;
        }
        let rect = Rect::at(l + inset, t + inset).of_size(iw as u32, ih as u32);
        draw_hollow_rect_mut(canvas, rect, color);
    }
}

/// Uniformly scale `bitmap` to `height` pixels tall.
fn fit_height(bitmap: &RgbaImage, height: u32) -> RgbaImage {
    if bitmap.height() == height || bitmap.height() == 0 {
        return bitmap.clone();
    }
    let scale = height as f32 / bitmap.height() as f32;
    let width = ((bitmap.width() as f32 * scale).round() as u32).max(1);
    image::imageops::resize(bitmap, width, height, FilterType::Triangle)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Landmark, LandmarkKind};

    fn solid(w: u32, h: u32, c: [u8; 4]) -> Arc<RgbaImage> {
        Arc::new(RgbaImage::from_pixel(w, h, Rgba(c)))
    }

    fn graphic_with(face: Face) -> FaceGraphic {
        let mut g = FaceGraphic::new(7, &mut Palette::new());
        g.update_face(face);
        g
    }

    fn identity() -> CoordinateTransform {
        CoordinateTransform::derive(100.0, 100.0, 100.0, 100.0)
    }

    #[test]
    fn test_draw_without_face_is_noop() {
        let g = FaceGraphic::new(1, &mut Palette::new());
        let mut canvas = RgbaImage::new(50, 50);
        g.draw(&mut canvas, &identity());
        assert!(canvas.pixels().all(|p| p.0 == [0, 0, 0, 0]));
    }

    #[test]
    fn test_draw_box_and_center() {
        let g = graphic_with(Face::new(20.0, 20.0, 40.0, 40.0, 0.9));
        let mut canvas = RgbaImage::new(100, 100);
        g.draw(&mut canvas, &identity());

        assert_eq!(*canvas.get_pixel(40, 40), palette::CYAN);
        // Box edge and the inner stroke line.
        assert_eq!(*canvas.get_pixel(20, 40), palette::CYAN);
        assert_eq!(*canvas.get_pixel(24, 40), palette::CYAN);
        // Inside the stroke, outside the centre marker.
        assert_eq!(canvas.get_pixel(27, 40).0, [0, 0, 0, 0]);
    }

    #[test]
    fn test_draw_landmarks_in_green() {
        let mut face = Face::new(0.0, 0.0, 10.0, 10.0, 0.9);
        face.landmarks.push(Landmark {
            kind: LandmarkKind::NoseBase,
            x: 70.0,
            y: 70.0,
        });
        let mut g = graphic_with(face);
        g.set_style(GraphicStyle {
            position: false,
            bounding_box: false,
            landmarks: true,
        });
        let mut canvas = RgbaImage::new(100, 100);
        g.draw(&mut canvas, &identity());
        assert_eq!(*canvas.get_pixel(80, 70), palette::GREEN);
        assert_eq!(canvas.get_pixel(70, 70).0, [0, 0, 0, 0]);
    }

    #[test]
    fn test_feed_requires_smile_and_low_face() {
        let mut face = Face::new(40.0, 60.0, 20.0, 20.0, 0.9);
        face.smiling_probability = Some(0.1);
        let mut g = graphic_with(face.clone());
        g.set_style(GraphicStyle {
            position: false,
            bounding_box: false,
            landmarks: false,
        });
        g.set_feed(solid(4, 4, [9, 9, 9, 255]));

        let mut canvas = RgbaImage::new(100, 100);
        g.draw(&mut canvas, &identity());
        assert!(canvas.pixels().all(|p| p.0[3] == 0));

        face.smiling_probability = Some(0.8);
        g.update_face(face);
        g.draw(&mut canvas, &identity());
        // bottom = 80 >= 50; drawn at ((40 + 60) / 2, max(80, 96)) = (50, 96)
        assert_eq!(canvas.get_pixel(50, 96).0, [9, 9, 9, 255]);
    }

    #[test]
    fn test_shoulders_follow_rotation() {
        let mut g = graphic_with(Face::new(40.0, 40.0, 20.0, 20.0, 0.9));
        g.set_style(GraphicStyle {
            position: false,
            bounding_box: false,
            landmarks: false,
        });
        g.set_shoulders(solid(10, 50, [1, 1, 1, 255]), solid(10, 50, [2, 2, 2, 255]));

        let mut canvas = RgbaImage::new(100, 100);
        g.set_rotation(0.0);
        g.draw(&mut canvas, &identity());
        assert!(canvas.pixels().all(|p| p.0[3] == 0));

        g.set_rotation(-15.0);
        g.draw(&mut canvas, &identity());
        // Scaled to canvas height: 20 x 100, pinned left.
        assert_eq!(canvas.get_pixel(5, 99).0, [1, 1, 1, 255]);

        let mut canvas = RgbaImage::new(100, 100);
        g.set_rotation(15.0);
        g.draw(&mut canvas, &identity());
        assert_eq!(canvas.get_pixel(95, 50).0, [2, 2, 2, 255]);
        assert_eq!(canvas.get_pixel(5, 50).0, [0, 0, 0, 0]);
    }

    #[test]
    fn test_fit_height() {
        let scaled = fit_height(&RgbaImage::new(10, 20), 60);
        assert_eq!(scaled.dimensions(), (30, 60));
    }
}
