//! 帧标注 (Frame annotation)
//!
//! 在推流帧上绘制: 检测框 + 锚点 + 跟踪ID, 门线 (事件后高亮) + 门线名称。

use std::fs;
use std::path::Path;
use std::time::Instant;

use ab_glyph::{FontVec, PxScale};
use image::{Rgba, RgbaImage};
use imageproc::drawing::{
    draw_filled_circle_mut, draw_hollow_rect_mut, draw_line_segment_mut, draw_text_mut,
};
use imageproc::rect::Rect;
use tracing::info;

use crate::detection::{id_to_color, Detection};
use crate::engine::{EventKind, GateEngine};
use crate::error::{Result, SentinelError};
use crate::gate::GateSet;
use crate::geometry::Point;

const IDLE_COLOR: Rgba<u8> = Rgba([255, 255, 255, 255]);
const ENTRY_COLOR: Rgba<u8> = Rgba([0, 220, 0, 255]);
const OPPOSING_COLOR: Rgba<u8> = Rgba([230, 0, 0, 255]);
const GENERIC_COLOR: Rgba<u8> = Rgba([255, 210, 0, 255]);
const ANCHOR_COLOR: Rgba<u8> = Rgba([255, 0, 255, 255]);

const LABEL_SCALE: f32 = 20.0;
/// 门线绘制粗细 (像素)
const GATE_THICKNESS: i32 = 3;

pub struct Annotator {
    font: Option<FontVec>,
}

impl Annotator {
    /// 不绘制文字
    pub fn new() -> Self {
        Self { font: None }
    }

    pub fn with_font(font: FontVec) -> Self {
        Self { font: Some(font) }
    }

    pub fn from_font_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let data = fs::read(path)?;
        let font = FontVec::try_from_vec(data)
            .map_err(|e| SentinelError::Font(format!("{}: {e}", path.display())))?;
        info!(path = %path.display(), "字体已加载");
        Ok(Self::with_font(font))
    }

    pub fn has_font(&self) -> bool {
        self.font.is_some()
    }

    /// 门线颜色: 高亮未过期时按事件类型, 否则为空闲色
    pub fn gate_color(flash: Option<EventKind>) -> Rgba<u8> {
        match flash {
            Some(EventKind::Entry) => ENTRY_COLOR,
            Some(EventKind::Exit | EventKind::Invasion) => OPPOSING_COLOR,
            Some(EventKind::GenericCross) => GENERIC_COLOR,
            None => IDLE_COLOR,
        }
    }

    pub fn annotate(
        &self,
        image: &mut RgbaImage,
        gates: &GateSet,
        engine: &GateEngine,
        detections: &[Detection],
        now: Instant,
    ) {
        for detection in detections {
            self.draw_detection(image, detection);
        }
        for gate in gates.gates() {
            let color = Self::gate_color(engine.flash(gate.id(), now));
            draw_thick_line(image, gate.a(), gate.b(), color);
            if let Some(font) = &self.font {
                let (x, y) = label_origin(gate.a());
                draw_text_mut(image, color, x, y, PxScale::from(LABEL_SCALE), font, gate.name());
            }
        }
    }

    fn draw_detection(&self, image: &mut RgbaImage, detection: &Detection) {
        let (r, g, b) = id_to_color(detection.track_id);
        let color = Rgba([r, g, b, 255]);
        let bbox = &detection.bbox;

        let rect = Rect::at(bbox.x1 as i32, bbox.y1 as i32)
            .of_size(bbox.width().max(1.0) as u32, bbox.height().max(1.0) as u32);
        draw_hollow_rect_mut(image, rect, color);

        let anchor = detection.anchor;
        draw_filled_circle_mut(image, (anchor.x as i32, anchor.y as i32), 4, ANCHOR_COLOR);

        if let Some(font) = &self.font {
            let (x, y) = label_origin(Point::new(bbox.x1, bbox.y1));
            let label = format!("#{}", detection.track_id);
            draw_text_mut(image, color, x, y, PxScale::from(LABEL_SCALE), font, &label);
        }
    }
}

impl Default for Annotator {
    fn default() -> Self {
        Self::new()
    }
}

/// 文字放在点的上方, 贴近顶部时放到下方
fn label_origin(p: Point) -> (i32, i32) {
    let y = p.y as i32 - LABEL_SCALE as i32 - 2;
    (p.x as i32, if y < 0 { p.y as i32 + 4 } else { y })
}

/// 沿法向平移多次绘制, 得到有宽度的线
fn draw_thick_line(image: &mut RgbaImage, a: Point, b: Point, color: Rgba<u8>) {
    let n = crate::geometry::unit_normal(a, b);
    for k in -(GATE_THICKNESS / 2)..=(GATE_THICKNESS / 2) {
        let (dx, dy) = (n.x * k as f32, n.y * k as f32);
        draw_line_segment_mut(image, (a.x + dx, a.y + dy), (b.x + dx, b.y + dy), color);
    }
}
