// 该文件是 Sentinel （哨兵） 项目的一部分。
// src/output/save_image_file.rs - 保存图像文件
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

use std::path::{Path, PathBuf};

use image::RgbImage;
use thiserror::Error;
use tracing::info;
use url::Url;

use crate::{
  FromUrl, FromUrlWithScheme,
  frame::Frame,
  output::{Render, draw::side_by_side},
};

const COMPARISON_SUFFIX: &str = "_comparacion";

#[derive(Error, Debug)]
pub enum SaveImageFileError {
  #[error("I/O 错误: {0}")]
  IoError(#[from] std::io::Error),
  #[error("图像错误: {0}")]
  ImageError(#[from] image::ImageError),
  #[error("URI 方案不匹配: {0}")]
  SchemeMismatch(String),
}

/// 把标注结果保存为图像文件
///
/// 另外可以保存一张原图与标注图左右拼接的对比图，文件名为
/// `<名称>_comparacion.<扩展名>`。
pub struct SaveImageFileOutput {
  path: PathBuf,
}

impl FromUrlWithScheme for SaveImageFileOutput {
  const SCHEME: &'static str = "image";
}

impl FromUrl for SaveImageFileOutput {
  type Error = SaveImageFileError;

  fn from_url(uri: &Url) -> Result<Self, Self::Error> {
    if uri.scheme() != Self::SCHEME {
      return Err(SaveImageFileError::SchemeMismatch(format!(
        "期望保存方式 '{}', 实际保存方式 '{}'",
        Self::SCHEME,
        uri.scheme()
      )));
    }

    Ok(Self::new(uri.path()))
  }
}

impl SaveImageFileOutput {
  pub fn new(path: impl Into<PathBuf>) -> Self {
    Self { path: path.into() }
  }

  pub fn path(&self) -> &Path {
    &self.path
  }

  pub fn comparison_path(&self) -> PathBuf {
    let stem = self
      .path
      .file_stem()
      .map(|s| s.to_string_lossy().into_owned())
      .unwrap_or_default();
    let ext = self
      .path
      .extension()
      .map(|s| s.to_string_lossy().into_owned())
      .unwrap_or_else(|| "png".to_string());
    self
      .path
      .with_file_name(format!("{}{}.{}", stem, COMPARISON_SUFFIX, ext))
  }

  /// 保存原图与标注图的对比图，返回写入路径
  pub fn save_comparison(
    &self,
    original: &Frame,
    annotated: &Frame,
  ) -> Result<PathBuf, SaveImageFileError> {
    let path = self.comparison_path();
    save_image(&path, side_by_side(original, annotated))?;
    Ok(path)
  }
}

fn save_image(path: &Path, image: RgbImage) -> Result<(), SaveImageFileError> {
  if let Some(parent) = path.parent()
    && !parent.as_os_str().is_empty()
  {
    std::fs::create_dir_all(parent)?;
  }

  image.save(path)?;
  info!("保存图像到文件: {}", path.display());

  Ok(())
}

impl Render for SaveImageFileOutput {
  type Error = SaveImageFileError;

  fn render_frame(&mut self, annotated: &Frame) -> Result<(), Self::Error> {
    save_image(&self.path, annotated.to_rgb_image())
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn saves_annotated_and_comparison_images() {
    let dir = tempfile::tempdir().unwrap();
    let mut output = SaveImageFileOutput::new(dir.path().join("salida/resultado.png"));

    let original = Frame::filled(6, 4, [0, 0, 0]);
    let annotated = Frame::filled(6, 4, [255, 68, 68]);
    output.render_frame(&annotated).unwrap();
    let comparison = output.save_comparison(&original, &annotated).unwrap();

    assert_eq!(comparison, dir.path().join("salida/resultado_comparacion.png"));
    let saved = image::open(output.path()).unwrap().into_rgb8();
    assert_eq!(saved.dimensions(), (6, 4));
    assert_eq!(saved.get_pixel(0, 0).0, [255, 68, 68]);
    let joined = image::open(&comparison).unwrap().into_rgb8();
    assert_eq!(joined.dimensions(), (12, 4));
  }

  #[test]
  fn from_url_checks_scheme() {
    let url = Url::parse("gstvideo:///tmp/out.png").unwrap();
    assert!(matches!(
      SaveImageFileOutput::from_url(&url),
      Err(SaveImageFileError::SchemeMismatch(_))
    ));
    let url = Url::parse("image:///tmp/out.jpg").unwrap();
    let output = SaveImageFileOutput::from_url(&url).unwrap();
    assert_eq!(output.comparison_path(), PathBuf::from("/tmp/out_comparacion.jpg"));
  }
}
