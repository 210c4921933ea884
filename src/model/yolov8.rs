// 该文件是 Sentinel （哨兵） 项目的一部分。
// src/model/yolov8.rs - 基于 tract 的 YOLOv8 ONNX 检测模型
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

use std::{
  path::{Path, PathBuf},
  sync::Mutex,
};

use image::{Rgb, RgbImage, imageops::FilterType};
use tract_onnx::prelude::*;
use tracing::{debug, info, warn};

use crate::{
  config::{MAX_DETECTIONS, MODEL_INPUT_SIZE, NMS_IOU_THRESHOLD},
  frame::Frame,
  model::{
    Detection, HelmetClass, InferError, Model, ModelLoadError, WithLabel, non_max_suppression,
  },
};

type Plan = SimplePlan<TypedFact, Box<dyn TypedOp>, Graph<TypedFact, Box<dyn TypedOp>>>;

const LETTERBOX_FILL: u8 = 114;
const BOX_COORDS: usize = 4;

pub struct YoloV8Builder {
  model_path: PathBuf,
  input_size: u32,
  iou_threshold: f32,
  max_detections: usize,
}

impl YoloV8Builder {
  pub fn new(model_path: impl AsRef<Path>) -> Self {
    Self {
      model_path: model_path.as_ref().to_path_buf(),
      input_size: MODEL_INPUT_SIZE,
      iou_threshold: NMS_IOU_THRESHOLD,
      max_detections: MAX_DETECTIONS,
    }
  }

  pub fn input_size(mut self, input_size: u32) -> Self {
    self.input_size = input_size;
    self
  }

  pub fn iou_threshold(mut self, iou_threshold: f32) -> Self {
    self.iou_threshold = iou_threshold;
    self
  }

  pub fn build(self) -> Result<YoloV8, ModelLoadError> {
    let path = &self.model_path;
    if !path.exists() {
      return Err(ModelLoadError::NotFound(path.display().to_string()));
    }

    let metadata = std::fs::metadata(path).map_err(|e| ModelLoadError::Io(e.to_string()))?;
    debug!(
      "模型文件大小: {:.2} MB",
      metadata.len() as f64 / (1024.0 * 1024.0)
    );

    let size = self.input_size as usize;
    let plan = tract_onnx::onnx()
      .model_for_path(path)
      .and_then(|model| {
        model.with_input_fact(0, f32::fact([1, 3, size, size]).into())
      })
      .and_then(|model| model.into_optimized())
      .and_then(|model| model.into_runnable())
      .map_err(|e| ModelLoadError::Invalid(format!("{}: {:#}", path.display(), e)))?;

    info!(
      "YOLOv8 模型就绪: {} (输入 {}x{})",
      path.display(),
      self.input_size,
      self.input_size
    );

    Ok(YoloV8 {
      plan: Mutex::new(plan),
      input_size: self.input_size,
      iou_threshold: self.iou_threshold,
      max_detections: self.max_detections,
    })
  }
}

/// YOLOv8 检测器
///
/// tract 执行计划放在互斥锁后面，实时模式下并发的回调会在这里串行化。
pub struct YoloV8 {
  plan: Mutex<Plan>,
  input_size: u32,
  iou_threshold: f32,
  max_detections: usize,
}

/// 原图到模型输入的缩放与填充参数
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) struct Letterbox {
  pub scale: f32,
  pub pad_x: f32,
  pub pad_y: f32,
}

impl Letterbox {
  pub(crate) fn new(width: u32, height: u32, target: u32) -> Self {
    let scale = (target as f32 / width as f32).min(target as f32 / height as f32);
    let new_w = (width as f32 * scale).round();
    let new_h = (height as f32 * scale).round();
    Self {
      scale,
      pad_x: ((target as f32 - new_w) / 2.0).floor(),
      pad_y: ((target as f32 - new_h) / 2.0).floor(),
    }
  }

  /// 将模型坐标系中的框映射回原图并裁剪到图像范围内
  pub(crate) fn unmap(&self, bbox: [f32; 4], width: u32, height: u32) -> [f32; 4] {
    let x1 = ((bbox[0] - self.pad_x) / self.scale).clamp(0.0, width as f32);
    let y1 = ((bbox[1] - self.pad_y) / self.scale).clamp(0.0, height as f32);
    let x2 = ((bbox[2] - self.pad_x) / self.scale).clamp(0.0, width as f32);
    let y2 = ((bbox[3] - self.pad_y) / self.scale).clamp(0.0, height as f32);
    [x1, y1, x2, y2]
  }
}

impl YoloV8 {
  fn preprocess(&self, frame: &Frame) -> (Tensor, Letterbox) {
    let target = self.input_size;
    let letterbox = Letterbox::new(frame.width(), frame.height(), target);
    let new_w = ((frame.width() as f32 * letterbox.scale).round() as u32).max(1);
    let new_h = ((frame.height() as f32 * letterbox.scale).round() as u32).max(1);

    let resized = image::imageops::resize(&frame.to_rgb_image(), new_w, new_h, FilterType::Triangle);
    let mut canvas = RgbImage::from_pixel(target, target, Rgb([LETTERBOX_FILL; 3]));
    image::imageops::replace(
      &mut canvas,
      &resized,
      letterbox.pad_x as i64,
      letterbox.pad_y as i64,
    );

    let size = target as usize;
    let input = tract_ndarray::Array4::from_shape_fn((1, 3, size, size), |(_, c, y, x)| {
      canvas.get_pixel(x as u32, y as u32)[c] as f32 / 255.0
    });

    (input.into_tensor(), letterbox)
  }
}

/// 解码 `[1, 4 + classes, anchors]`（或转置后的 `[1, anchors, 4 + classes]`）输出
pub(crate) fn decode_predictions(
  data: &[f32],
  shape: &[usize],
  confidence_threshold: f32,
  letterbox: &Letterbox,
  width: u32,
  height: u32,
) -> Result<Vec<Detection>, InferError> {
  if shape.len() != 3 || shape[0] != 1 {
    return Err(InferError::InvalidOutput(format!("意外的输出形状: {:?}", shape)));
  }

  // 锚点数量总是远大于属性数量
  let transposed = shape[1] > shape[2];
  let (attrs, anchors) = if transposed {
    (shape[2], shape[1])
  } else {
    (shape[1], shape[2])
  };
  if attrs <= BOX_COORDS {
    return Err(InferError::InvalidOutput(format!("输出属性数量不足: {}", attrs)));
  }
  if data.len() < attrs * anchors {
    return Err(InferError::InvalidOutput(format!(
      "输出长度不足: 期望 {}, 实际 {}",
      attrs * anchors,
      data.len()
    )));
  }

  let at = |attr: usize, anchor: usize| {
    if transposed {
      data[anchor * attrs + attr]
    } else {
      data[attr * anchors + anchor]
    }
  };

  let num_classes = attrs - BOX_COORDS;
  let mut candidates = Vec::new();
  for i in 0..anchors {
    let (class_id, score) = (0..num_classes)
      .map(|c| (c, at(BOX_COORDS + c, i)))
      .fold((0usize, f32::MIN), |best, cur| if cur.1 > best.1 { cur } else { best });

    // 置信度必须严格大于阈值
    if score <= confidence_threshold {
      continue;
    }

    let Some(class) = HelmetClass::from_label_id(class_id as u32) else {
      debug!("忽略未知类别 {}", class_id);
      continue;
    };

    let (cx, cy, w, h) = (at(0, i), at(1, i), at(2, i), at(3, i));
    let bbox = letterbox.unmap(
      [cx - w / 2.0, cy - h / 2.0, cx + w / 2.0, cy + h / 2.0],
      width,
      height,
    );
    candidates.push(Detection {
      class,
      confidence: score.clamp(0.0, 1.0),
      bbox,
    });
  }

  Ok(candidates)
}

impl Model for YoloV8 {
  fn name(&self) -> &'static str {
    "yolov8-tract"
  }

  fn infer(&self, frame: &Frame, confidence_threshold: f32) -> Result<Vec<Detection>, InferError> {
    let (input, letterbox) = self.preprocess(frame);

    let outputs = {
      let plan = self
        .plan
        .lock()
        .map_err(|_| InferError::Backend("推理计划锁已损坏".to_string()))?;
      plan
        .run(tvec!(input.into()))
        .map_err(|e| InferError::Backend(format!("{:#}", e)))?
    };

    let output = outputs
      .first()
      .ok_or_else(|| InferError::InvalidOutput("模型没有输出".to_string()))?;
    let view = output
      .to_array_view::<f32>()
      .map_err(|e| InferError::InvalidOutput(format!("{:#}", e)))?;
    let shape = view.shape().to_vec();
    let data: Vec<f32> = view.iter().copied().collect();

    let candidates = decode_predictions(
      &data,
      &shape,
      confidence_threshold,
      &letterbox,
      frame.width(),
      frame.height(),
    )?;
    let detections = non_max_suppression(candidates, self.iou_threshold, self.max_detections);
    if detections.len() == self.max_detections {
      warn!("检测数量达到上限 {}", self.max_detections);
    }
    debug!("检测到 {} 个目标", detections.len());

    Ok(detections)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn letterbox_pads_the_short_side() {
    let lb = Letterbox::new(1280, 640, 640);
    assert_eq!(lb.scale, 0.5);
    assert_eq!(lb.pad_x, 0.0);
    assert_eq!(lb.pad_y, 160.0);

    let bbox = lb.unmap([100.0, 200.0, 300.0, 400.0], 1280, 640);
    assert_eq!(bbox, [200.0, 80.0, 600.0, 480.0]);
  }

  #[test]
  fn decode_filters_by_threshold_and_class() {
    // 8 个锚点，2 个类别，布局为 [1, 6, 8]
    let anchors = 8;
    let mut data = vec![0.0f32; 6 * anchors];
    let mut set = |anchor: usize, values: [f32; 6]| {
      for (attr, v) in values.iter().enumerate() {
        data[attr * anchors + anchor] = *v;
      }
    };
    set(0, [100.0, 100.0, 20.0, 40.0, 0.9, 0.05]);
    set(1, [200.0, 200.0, 20.0, 40.0, 0.1, 0.8]);
    set(2, [300.0, 300.0, 20.0, 40.0, 0.3, 0.4]);

    let lb = Letterbox::new(640, 640, 640);
    let dets = decode_predictions(&data, &[1, 6, anchors], 0.5, &lb, 640, 640).unwrap();
    assert_eq!(dets.len(), 2);
    assert_eq!(dets[0].class, HelmetClass::Helmet);
    assert_eq!(dets[0].bbox, [90.0, 80.0, 110.0, 120.0]);
    assert_eq!(dets[1].class, HelmetClass::NoHelmet);
    assert!((dets[1].confidence - 0.8).abs() < 1e-6);
  }

  #[test]
  fn score_equal_to_threshold_is_dropped() {
    let anchors = 8;
    let mut data = vec![0.0f32; 6 * anchors];
    for (attr, v) in [50.0, 50.0, 10.0, 10.0, 0.5, 0.0].iter().enumerate() {
      data[attr * anchors] = *v;
    }
    for (attr, v) in [90.0, 90.0, 10.0, 10.0, 0.0, 0.51].iter().enumerate() {
      data[attr * anchors + 1] = *v;
    }

    let lb = Letterbox::new(640, 640, 640);
    let dets = decode_predictions(&data, &[1, 6, anchors], 0.5, &lb, 640, 640).unwrap();
    assert_eq!(dets.len(), 1);
    assert_eq!(dets[0].class, HelmetClass::NoHelmet);
  }

  #[test]
  fn decode_accepts_transposed_layout() {
    // [1, anchors, attrs]，锚点数大于属性数
    let attrs = 6;
    let anchors = 8;
    let mut data = vec![0.0f32; attrs * anchors];
    let row = 5;
    data[row * attrs..row * attrs + attrs].copy_from_slice(&[320.0, 320.0, 64.0, 64.0, 0.2, 0.95]);
    let lb = Letterbox::new(640, 640, 640);
    let dets = decode_predictions(&data, &[1, anchors, attrs], 0.5, &lb, 640, 640).unwrap();
    assert_eq!(dets.len(), 1);
    assert_eq!(dets[0].class, HelmetClass::NoHelmet);
  }

  #[test]
  fn decode_rejects_bad_shapes() {
    let lb = Letterbox::new(640, 640, 640);
    assert!(decode_predictions(&[0.0; 4], &[1, 4], 0.5, &lb, 640, 640).is_err());
    assert!(decode_predictions(&[0.0; 12], &[1, 4, 3], 0.5, &lb, 640, 640).is_err());
  }

  #[test]
  fn missing_weights_are_reported_as_not_found() {
    let err = YoloV8Builder::new("/nonexistent/best.onnx").build().err();
    assert!(matches!(err, Some(ModelLoadError::NotFound(_))));
  }

  #[test]
  fn corrupt_weights_are_reported_as_invalid() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("best.onnx");
    std::fs::write(&path, b"not an onnx model").unwrap();
    let err = YoloV8Builder::new(&path).build().err();
    assert!(matches!(err, Some(ModelLoadError::Invalid(_))));
  }
}
