// 该文件是 Sentinel （哨兵） 项目的一部分。
// src/input/read_image_file.rs - 图像文件输入
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
  io::{BufRead, Cursor, Seek},
  path::Path,
};

use image::{DynamicImage, ImageDecoder, ImageReader, metadata::Orientation};
use thiserror::Error;
use tracing::{debug, error};
use url::Url;

use crate::{FromUrl, FromUrlWithScheme, config::is_image_path, frame::Frame};

#[derive(Error, Debug)]
pub enum ImageFileInputError {
  #[error("URI schema mismatch")]
  SchemaMismatch,
  #[error("Unsupported image type: {0}")]
  UnsupportedType(String),
  #[error("I/O error: {0}")]
  IoError(#[from] std::io::Error),
  #[error("Image decoding error: {0}")]
  ImageLoadError(#[from] image::ImageError),
}

/// 单张图片输入，解码时按 EXIF 方向信息校正
pub struct ImageFileInput {
  image: Option<Frame>,
}

impl FromUrlWithScheme for ImageFileInput {
  const SCHEME: &'static str = "image";
}

impl FromUrl for ImageFileInput {
  type Error = ImageFileInputError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      error!(
        "URI scheme mismatch: expected '{}', found '{}'",
        Self::SCHEME,
        url.scheme()
      );
      return Err(ImageFileInputError::SchemaMismatch);
    }

    Self::open(url.path())
  }
}

impl ImageFileInput {
  pub fn open(path: impl AsRef<Path>) -> Result<Self, ImageFileInputError> {
    let path = path.as_ref();
    if !is_image_path(path) {
      return Err(ImageFileInputError::UnsupportedType(
        path.display().to_string(),
      ));
    }

    let reader = ImageReader::open(path)?.with_guessed_format()?;
    let image = decode_with_orientation(reader)?;
    Ok(Self {
      image: Some(Frame::from(image.into_rgb8())),
    })
  }

  /// 从内存中的上传内容解码
  pub fn from_bytes(bytes: &[u8]) -> Result<Self, ImageFileInputError> {
    let reader = ImageReader::new(Cursor::new(bytes)).with_guessed_format()?;
    let image = decode_with_orientation(reader)?;
    Ok(Self {
      image: Some(Frame::from(image.into_rgb8())),
    })
  }

  pub fn frame(&self) -> Option<&Frame> {
    self.image.as_ref()
  }
}

impl Iterator for ImageFileInput {
  type Item = Frame;

  fn next(&mut self) -> Option<Self::Item> {
    self.image.take()
  }
}

/// 解码图像并应用 EXIF 方向
///
/// 方向信息读取失败时保持原始方向，不向上报告。
fn decode_with_orientation<R: BufRead + Seek>(
  reader: ImageReader<R>,
) -> Result<DynamicImage, ImageFileInputError> {
  let mut decoder = reader.into_decoder()?;
  let orientation = match decoder.orientation() {
    Ok(orientation) => orientation,
    Err(e) => {
      debug!("读取 EXIF 方向失败，使用原始方向: {}", e);
      Orientation::NoTransforms
    }
  };
  let image = DynamicImage::from_decoder(decoder)?;
  Ok(apply_orientation(image, orientation))
}

pub fn apply_orientation(mut image: DynamicImage, orientation: Orientation) -> DynamicImage {
  if orientation != Orientation::NoTransforms {
    debug!("应用 EXIF 方向校正: {:?}", orientation);
    image.apply_orientation(orientation);
  }
  image
}
