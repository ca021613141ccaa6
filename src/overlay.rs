// src/overlay.rs - draws the skeleton onto a copy of the display frame
use std::borrow::Cow;

use image::{Rgb, RgbImage};
use serde::{Deserialize, Serialize};

use crate::geometry::MirrorPoint;
use crate::pose::{Joint, Keypoint2D, Skeleton, SkeletonPoint};

pub const MAX_MARKER_RADIUS: i32 = 256;
pub const MAX_LINE_THICKNESS: u32 = 64;

/// A joint position in display pixels.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RenderPoint {
    pub joint: Joint,
    pub x: f64,
    pub y: f64,
    pub valid: bool,
}

impl RenderPoint {
    /// Camera-pixel placement, used only by the explicit uncalibrated fallback.
    pub fn from_camera(keypoint: &Keypoint2D) -> Self {
        Self {
            joint: keypoint.joint,
            x: keypoint.pixel_x,
            y: keypoint.pixel_y,
            valid: keypoint.valid,
        }
    }
}

impl SkeletonPoint for RenderPoint {
    fn joint(&self) -> Joint {
        self.joint
    }

    fn is_valid(&self) -> bool {
        self.valid
    }
}

/// Orthographic mapping from the mirror plane (mirror x/y, metres) to display pixels.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DisplayMapping {
    pub pixels_per_meter: f64,
    /// Display pixel of the mirror-space origin.
    pub origin_px: [f64; 2],
    /// Mirror the x axis so the overlay follows the reflection.
    pub flip_horizontal: bool,
}

impl Default for DisplayMapping {
    fn default() -> Self {
        Self {
            pixels_per_meter: 500.0,
            origin_px: [320.0, 240.0],
            flip_horizontal: true,
        }
    }
}

impl DisplayMapping {
    pub fn to_render(&self, point: &MirrorPoint) -> RenderPoint {
        if !point.valid {
            return RenderPoint {
                joint: point.joint,
                x: 0.0,
                y: 0.0,
                valid: false,
            };
        }
        let sx = if self.flip_horizontal { -1.0 } else { 1.0 };
        RenderPoint {
            joint: point.joint,
            x: self.origin_px[0] + sx * point.point.x * self.pixels_per_meter,
            y: self.origin_px[1] + point.point.y * self.pixels_per_meter,
            valid: true,
        }
    }

    pub fn to_render_skeleton(&self, skeleton: &Skeleton<MirrorPoint>) -> Skeleton<RenderPoint> {
        skeleton.map(|p| self.to_render(p))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct OverlayStyle {
    pub skeleton_color: [u8; 3],
    pub joint_color: [u8; 3],
    pub marker_radius: i32,
    pub line_thickness: u32,
}

impl Default for OverlayStyle {
    fn default() -> Self {
        Self {
            skeleton_color: [0, 255, 0],
            joint_color: [255, 128, 0],
            marker_radius: 4,
            line_thickness: 2,
        }
    }
}

/// What the overlay is drawn over.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Background {
    /// The color frame the pose was estimated from.
    #[default]
    Color,
    /// Black, for half-silvered mirrors where only the overlay should light up.
    Blank,
}

impl Background {
    pub fn frame_for(self, color: &RgbImage) -> Cow<'_, RgbImage> {
        match self {
            Background::Color => Cow::Borrowed(color),
            Background::Blank => Cow::Owned(RgbImage::new(color.width(), color.height())),
        }
    }
}

/// What one render call put on screen.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RenderStats {
    pub markers: usize,
    pub edges: usize,
}

#[derive(Debug, Clone, Default)]
pub struct OverlayRenderer {
    style: OverlayStyle,
}

impl OverlayRenderer {
    pub fn new(style: OverlayStyle) -> Self {
        Self { style }
    }

    pub fn style(&self) -> &OverlayStyle {
        &self.style
    }

    /// Returns a composited copy of `frame`; the input is left untouched.
    pub fn render(&self, frame: &RgbImage, skeleton: &Skeleton<RenderPoint>) -> RgbImage {
        self.render_counted(frame, skeleton).0
    }

    pub fn render_counted(
        &self,
        frame: &RgbImage,
        skeleton: &Skeleton<RenderPoint>,
    ) -> (RgbImage, RenderStats) {
        let mut canvas = Canvas {
            image: frame.clone(),
        };
        let mut stats = RenderStats::default();

        // lines first so markers stay on top
        let line_color = Rgb(self.style.skeleton_color);
        let (width, height) = frame.dimensions();
        let margin = f64::from(self.style.line_thickness.min(MAX_LINE_THICKNESS));
        for (start, end) in skeleton.valid_edges() {
            stats.edges += 1;
            let Some([x0, y0, x1, y1]) = clip_segment(
                [start.x, start.y, end.x, end.y],
                [-margin, -margin, f64::from(width) + margin, f64::from(height) + margin],
            ) else {
                continue;
            };
            canvas.draw_line(
                to_pixel(x0),
                to_pixel(y0),
                to_pixel(x1),
                to_pixel(y1),
                self.style.line_thickness,
                line_color,
            );
        }

        let joint_color = Rgb(self.style.joint_color);
        for point in skeleton.iter().filter(|p| p.valid) {
            canvas.draw_disc(
                to_pixel(point.x),
                to_pixel(point.y),
                self.style.marker_radius,
                joint_color,
            );
            stats.markers += 1;
        }

        (canvas.image, stats)
    }
}

/// Liang-Barsky clip of `[x0, y0, x1, y1]` against `[min_x, min_y, max_x, max_y]`.
fn clip_segment(seg: [f64; 4], bounds: [f64; 4]) -> Option<[f64; 4]> {
    let [x0, y0, x1, y1] = seg;
    let [min_x, min_y, max_x, max_y] = bounds;
    let (dx, dy) = (x1 - x0, y1 - y0);
    let mut t0 = 0.0_f64;
    let mut t1 = 1.0_f64;
    for (p, q) in [
        (-dx, x0 - min_x),
        (dx, max_x - x0),
        (-dy, y0 - min_y),
        (dy, max_y - y0),
    ] {
        if p == 0.0 {
            if q < 0.0 {
                return None;
            }
        } else {
            let r = q / p;
            if p < 0.0 {
                t0 = t0.max(r);
            } else {
                t1 = t1.min(r);
            }
        }
    }
    (t0 <= t1).then(|| [x0 + t0 * dx, y0 + t0 * dy, x0 + t1 * dx, y0 + t1 * dy])
}

fn to_pixel(v: f64) -> i32 {
    v.round().clamp(f64::from(i32::MIN / 2), f64::from(i32::MAX / 2)) as i32
}

struct Canvas {
    image: RgbImage,
}

impl Canvas {
    /// Bresenham line stamped with a square brush of `thickness` pixels.
    fn draw_line(&mut self, x0: i32, y0: i32, x1: i32, y1: i32, thickness: u32, color: Rgb<u8>) {
        let dx = (x1 - x0).abs();
        let dy = -(y1 - y0).abs();
        let sx = if x0 < x1 { 1 } else { -1 };
        let sy = if y0 < y1 { 1 } else { -1 };
        let mut err = dx + dy;
        let (mut x, mut y) = (x0, y0);

        let t = thickness.clamp(1, MAX_LINE_THICKNESS) as i32;
        let lo = -(t - 1) / 2;
        let hi = t / 2;

        loop {
            for oy in lo..=hi {
                for ox in lo..=hi {
                    self.set_pixel(x + ox, y + oy, color);
                }
            }
            if x == x1 && y == y1 {
                break;
            }
            let e2 = 2 * err;
            if e2 >= dy {
                err += dy;
                x += sx;
            }
            if e2 <= dx {
                err += dx;
                y += sy;
            }
        }
    }

    /// Only the part of the disc inside the image is visited.
    fn draw_disc(&mut self, cx: i32, cy: i32, radius: i32, color: Rgb<u8>) {
        let radius = i64::from(radius.min(MAX_MARKER_RADIUS));
        if radius < 0 {
            return;
        }
        let (cx, cy) = (i64::from(cx), i64::from(cy));
        let width = i64::from(self.image.width());
        let height = i64::from(self.image.height());
        let (x0, x1) = ((cx - radius).max(0), (cx + radius).min(width - 1));
        let (y0, y1) = ((cy - radius).max(0), (cy + radius).min(height - 1));
        for y in y0..=y1 {
            for x in x0..=x1 {
                let (dx, dy) = (x - cx, y - cy);
                if dx * dx + dy * dy <= radius * radius {
                    self.image.put_pixel(x as u32, y as u32, color);
                }
            }
        }
    }

    fn set_pixel(&mut self, x: i32, y: i32, color: Rgb<u8>) {
        if x >= 0 && y >= 0 && (x as u32) < self.image.width() && (y as u32) < self.image.height()
        {
            self.image.put_pixel(x as u32, y as u32, color);
        }
    }
}
