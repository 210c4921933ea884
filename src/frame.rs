// 该文件是 Sentinel （哨兵） 项目的一部分。
// src/frame.rs - RGB NHWC 帧定义
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

use image::{ImageBuffer, Rgb, RgbImage};
use thiserror::Error;

pub const RGB_CHANNELS: usize = 3;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum FrameError {
  #[error("数据长度不匹配: 期望长度 {expected}, 实际长度 {actual}")]
  LengthMismatch { expected: usize, actual: usize },
  #[error("帧尺寸无效: {0}x{1}")]
  EmptyShape(u32, u32),
}

/// 一帧 RGB 图像，按 HWC（行优先，像素内 R、G、B）排列
///
/// 帧在流水线各阶段之间按值传递，任何阶段都不会与其他阶段共享可变引用。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
  width: u32,
  height: u32,
  data: Box<[u8]>,
}

impl Frame {
  pub fn new(width: u32, height: u32, data: Vec<u8>) -> Result<Self, FrameError> {
    if width == 0 || height == 0 {
      return Err(FrameError::EmptyShape(width, height));
    }
    let expected = RGB_CHANNELS * width as usize * height as usize;
    if data.len() != expected {
      return Err(FrameError::LengthMismatch {
        expected,
        actual: data.len(),
      });
    }

    Ok(Self {
      width,
      height,
      data: data.into_boxed_slice(),
    })
  }

  /// 填充单一颜色的帧
  pub fn filled(width: u32, height: u32, color: [u8; 3]) -> Self {
    let data = color
      .iter()
      .copied()
      .cycle()
      .take(RGB_CHANNELS * width as usize * height as usize)
      .collect::<Vec<u8>>();
    Self {
      width,
      height,
      data: data.into_boxed_slice(),
    }
  }

  pub fn width(&self) -> u32 {
    self.width
  }

  pub fn height(&self) -> u32 {
    self.height
  }

  pub fn channels(&self) -> usize {
    RGB_CHANNELS
  }

  pub fn as_nhwc(&self) -> &[u8] {
    &self.data
  }

  pub fn pixel(&self, x: u32, y: u32) -> [u8; 3] {
    let idx = (y as usize * self.width as usize + x as usize) * RGB_CHANNELS;
    [self.data[idx], self.data[idx + 1], self.data[idx + 2]]
  }

  pub fn to_rgb_image(&self) -> RgbImage {
    let width = self.width as usize;
    let data = &self.data;
    ImageBuffer::from_fn(self.width, self.height, |x, y| {
      let idx = (y as usize * width + x as usize) * RGB_CHANNELS;
      Rgb([data[idx], data[idx + 1], data[idx + 2]])
    })
  }
}

impl AsMut<[u8]> for Frame {
  fn as_mut(&mut self) -> &mut [u8] {
    &mut self.data
  }
}

impl From<RgbImage> for Frame {
  fn from(image: RgbImage) -> Self {
    let (width, height) = image.dimensions();
    Self {
      width,
      height,
      data: image.into_raw().into_boxed_slice(),
    }
  }
}

impl From<&Frame> for RgbImage {
  fn from(frame: &Frame) -> Self {
    frame.to_rgb_image()
  }
}
