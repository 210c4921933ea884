// 该文件是 Sentinel （哨兵） 项目的一部分。
// src/model.rs - 模型
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

use thiserror::Error;

use crate::frame::Frame;

pub trait WithLabel: Sized + std::fmt::Debug {
  fn to_label_str(&self) -> String;
  fn to_label_id(&self) -> u32;
  fn from_label_id(id: u32) -> Option<Self>;
}

/// 头盔检测模型的两个类别
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HelmetClass {
  /// 类别 0：佩戴头盔
  Helmet,
  /// 类别 1：未佩戴头盔
  NoHelmet,
}

impl WithLabel for HelmetClass {
  fn to_label_str(&self) -> String {
    match self {
      HelmetClass::Helmet => "casco".to_string(),
      HelmetClass::NoHelmet => "sin casco".to_string(),
    }
  }

  fn to_label_id(&self) -> u32 {
    match self {
      HelmetClass::Helmet => 0,
      HelmetClass::NoHelmet => 1,
    }
  }

  fn from_label_id(id: u32) -> Option<Self> {
    match id {
      0 => Some(HelmetClass::Helmet),
      1 => Some(HelmetClass::NoHelmet),
      _ => None,
    }
  }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Detection {
  pub class: HelmetClass,
  pub confidence: f32,
  pub bbox: [f32; 4], // [x_min, y_min, x_max, y_max]，原图像素坐标
}

impl Detection {
  pub fn width(&self) -> f32 {
    self.bbox[2] - self.bbox[0]
  }

  pub fn height(&self) -> f32 {
    self.bbox[3] - self.bbox[1]
  }

  pub fn area(&self) -> f32 {
    self.width().max(0.0) * self.height().max(0.0)
  }

  pub fn iou(&self, other: &Detection) -> f32 {
    let ix1 = self.bbox[0].max(other.bbox[0]);
    let iy1 = self.bbox[1].max(other.bbox[1]);
    let ix2 = self.bbox[2].min(other.bbox[2]);
    let iy2 = self.bbox[3].min(other.bbox[3]);
    let inter = (ix2 - ix1).max(0.0) * (iy2 - iy1).max(0.0);
    if inter == 0.0 {
      return 0.0;
    }
    let union = self.area() + other.area() - inter;
    if union <= 0.0 { 0.0 } else { inter / union }
  }
}

#[derive(Error, Debug)]
pub enum InferError {
  #[error("模型不可用: {0}")]
  ModelUnavailable(String),
  #[error("输入张量错误: {0}")]
  InvalidInput(String),
  #[error("推理失败: {0}")]
  Backend(String),
  #[error("模型输出格式错误: {0}")]
  InvalidOutput(String),
}

/// 检测模型接口
///
/// 实现者负责前处理、网络推理、框解码与 NMS，低于 `confidence_threshold`
/// 的检测在调用内部被过滤，调用方不再做后过滤。实现必须可重入，
/// 实时模式会在传输层的线程上并发调用。
pub trait Model: Send + Sync {
  fn name(&self) -> &'static str;

  fn infer(&self, frame: &Frame, confidence_threshold: f32) -> Result<Vec<Detection>, InferError>;
}

mod loader;
pub use self::loader::{ModelHandle, ModelLoadError, ModelRegistry, load};

#[cfg(feature = "backend_tract")]
mod yolov8;
#[cfg(feature = "backend_tract")]
pub use self::yolov8::{YoloV8, YoloV8Builder};

/// 非极大值抑制，按类别分别进行
pub fn non_max_suppression(
  mut candidates: Vec<Detection>,
  iou_threshold: f32,
  max_detections: usize,
) -> Vec<Detection> {
  candidates.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));

  let mut keep: Vec<Detection> = Vec::new();
  for candidate in candidates {
    if keep.len() >= max_detections {
      break;
    }
    let suppressed = keep
      .iter()
      .any(|kept| kept.class == candidate.class && kept.iou(&candidate) > iou_threshold);
    if !suppressed {
      keep.push(candidate);
    }
  }
  keep
}

#[cfg(test)]
mod tests {
  use super::*;

  fn det(class: HelmetClass, confidence: f32, bbox: [f32; 4]) -> Detection {
    Detection {
      class,
      confidence,
      bbox,
    }
  }

  #[test]
  fn label_ids_map_to_two_classes_only() {
    assert_eq!(HelmetClass::from_label_id(0), Some(HelmetClass::Helmet));
    assert_eq!(HelmetClass::from_label_id(1), Some(HelmetClass::NoHelmet));
    assert_eq!(HelmetClass::from_label_id(2), None);
    assert_eq!(HelmetClass::NoHelmet.to_label_id(), 1);
  }

  #[test]
  fn iou_of_identical_and_disjoint_boxes() {
    let a = det(HelmetClass::Helmet, 0.9, [0.0, 0.0, 10.0, 10.0]);
    let b = det(HelmetClass::Helmet, 0.8, [20.0, 20.0, 30.0, 30.0]);
    assert!((a.iou(&a) - 1.0).abs() < 1e-6);
    assert_eq!(a.iou(&b), 0.0);
  }

  #[test]
  fn nms_keeps_best_box_per_class() {
    let candidates = vec![
      det(HelmetClass::Helmet, 0.6, [0.0, 0.0, 10.0, 10.0]),
      det(HelmetClass::Helmet, 0.9, [1.0, 1.0, 10.0, 10.0]),
      det(HelmetClass::NoHelmet, 0.7, [0.0, 0.0, 10.0, 10.0]),
      det(HelmetClass::Helmet, 0.8, [50.0, 50.0, 60.0, 60.0]),
    ];
    let kept = non_max_suppression(candidates, 0.7, 300);
    assert_eq!(kept.len(), 3);
    assert_eq!(kept[0].confidence, 0.9);
    assert!(kept.iter().any(|d| d.class == HelmetClass::NoHelmet));
  }

  #[test]
  fn nms_respects_max_detections() {
    let candidates = (0..10)
      .map(|i| {
        let x = i as f32 * 20.0;
        det(HelmetClass::Helmet, 0.5 + i as f32 * 0.01, [x, 0.0, x + 10.0, 10.0])
      })
      .collect();
    assert_eq!(non_max_suppression(candidates, 0.7, 4).len(), 4);
  }
}
