// 该文件是 Sentinel （哨兵） 项目的一部分。
// src/output/draw.rs - 检测结果可视化
//
// 本文件根据 Apache 许可证第 2.0 版（以下简称“许可证”）授权使用；
// 除非遵守该许可证条款，否则您不得使用本文件。
// 您可通过以下网址获取许可证副本：
// http://www.apache.org/licenses/LICENSE-2.0
// 除非适用法律要求或书面同意，根据本许可协议分发的软件均按“原样”提供，
// 不附带任何形式的明示或暗示的保证或条件。
// 有关许可权限与限制的具体条款，请参阅本许可协议。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, Wareless Group

use std::path::Path;

use ab_glyph::{FontVec, PxScale};
use image::{Rgb, RgbImage};
use imageproc::{
  drawing::{draw_filled_rect_mut, draw_hollow_rect_mut, draw_text_mut, text_size},
  rect::Rect,
};
use tracing::{debug, warn};

use crate::{
  config::FALLBACK_FONTS,
  frame::Frame,
  model::{Detection, HelmetClass, WithLabel},
};

// 文本渲染常量
const LABEL_FONT_SIZE: f32 = 20.0;
const LABEL_TEXT_HEIGHT: i32 = 24;
const LABEL_TEXT_PADDING: i32 = 2;
const LABEL_CHAR_WIDTH: f32 = 11.0; // 无字体时估算标签宽度
const BOX_THICKNESS: i32 = 2;
const HELMET_COLOR: [u8; 3] = [0, 200, 81]; // 绿色
const NO_HELMET_COLOR: [u8; 3] = [255, 68, 68]; // 红色
const TEXT_COLOR: [u8; 3] = [255, 255, 255];

pub fn class_color(class: HelmetClass) -> [u8; 3] {
  match class {
    HelmetClass::Helmet => HELMET_COLOR,
    HelmetClass::NoHelmet => NO_HELMET_COLOR,
  }
}

/// 标注器：每个检测画一个边框和一个标签
///
/// `annotate` 是纯函数，总是在输入帧的副本上绘制。
pub struct Annotator {
  font: Option<FontVec>,
  font_size: f32,
  thickness: i32,
}

impl Default for Annotator {
  fn default() -> Self {
    Self {
      font: None,
      font_size: LABEL_FONT_SIZE,
      thickness: BOX_THICKNESS,
    }
  }
}

impl Annotator {
  /// 加载指定字体，未指定时尝试系统字体；都不可用时只绘制标签底色
  pub fn with_font(font_path: Option<&Path>) -> Self {
    let candidates = font_path
      .into_iter()
      .map(Path::to_path_buf)
      .chain(FALLBACK_FONTS.iter().map(std::path::PathBuf::from));

    for path in candidates {
      match std::fs::read(&path)
        .ok()
        .and_then(|data| FontVec::try_from_vec(data).ok())
      {
        Some(font) => {
          debug!("使用字体: {}", path.display());
          return Self {
            font: Some(font),
            ..Self::default()
          };
        }
        None => debug!("字体不可用: {}", path.display()),
      }
    }

    warn!("没有可用字体，标签将不包含文字");
    Self::default()
  }

  pub fn has_font(&self) -> bool {
    self.font.is_some()
  }

  pub fn annotate(&self, frame: &Frame, detections: &[Detection]) -> Frame {
    let mut image = frame.to_rgb_image();
    for detection in detections {
      self.draw_bbox_with_label(&mut image, detection);
    }
    Frame::from(image)
  }

  fn draw_bbox_with_label(&self, image: &mut RgbImage, detection: &Detection) {
    let (w, h) = (image.width() as i32, image.height() as i32);
    let color = Rgb(class_color(detection.class));

    let x_min = (detection.bbox[0].floor() as i32).clamp(0, w - 1);
    let y_min = (detection.bbox[1].floor() as i32).clamp(0, h - 1);
    let x_max = (detection.bbox[2].ceil() as i32).clamp(0, w - 1);
    let y_max = (detection.bbox[3].ceil() as i32).clamp(0, h - 1);

    if x_min >= x_max || y_min >= y_max {
      return;
    }

    // 向内加粗边框
    for t in 0..self.thickness {
      let width = x_max - x_min - 2 * t + 1;
      let height = y_max - y_min - 2 * t + 1;
      if width <= 0 || height <= 0 {
        break;
      }
      let rect = Rect::at(x_min + t, y_min + t).of_size(width as u32, height as u32);
      draw_hollow_rect_mut(image, rect, color);
    }

    let label = format!(
      "{} {:.2}",
      detection.class.to_label_str(),
      detection.confidence
    );
    let scale = PxScale::from(self.font_size);
    let text_width = match &self.font {
      Some(font) => text_size(scale, font, &label).0 as i32 + 2 * LABEL_TEXT_PADDING,
      None => (label.len() as f32 * LABEL_CHAR_WIDTH) as i32,
    };

    // 标签放在边框上方，空间不够时贴着图像上边缘
    let label_x = x_min;
    let label_y = (y_min - LABEL_TEXT_HEIGHT).max(0);
    let label_width = text_width.min(w - label_x);
    let label_height = LABEL_TEXT_HEIGHT.min(h - label_y);
    if label_width <= 0 || label_height <= 0 {
      return;
    }

    let rect = Rect::at(label_x, label_y).of_size(label_width as u32, label_height as u32);
    draw_filled_rect_mut(image, rect, color);

    if let Some(font) = &self.font {
      draw_text_mut(
        image,
        Rgb(TEXT_COLOR),
        label_x + LABEL_TEXT_PADDING,
        label_y + LABEL_TEXT_PADDING,
        scale,
        font,
        &label,
      );
    }
  }
}

/// 原图与标注图左右拼接
pub fn side_by_side(original: &Frame, annotated: &Frame) -> RgbImage {
  let width = original.width() + annotated.width();
  let height = original.height().max(annotated.height());
  let mut canvas = RgbImage::from_pixel(width, height, Rgb([26, 28, 36]));
  image::imageops::replace(&mut canvas, &original.to_rgb_image(), 0, 0);
  image::imageops::replace(
    &mut canvas,
    &annotated.to_rgb_image(),
    original.width() as i64,
    0,
  );
  canvas
}
