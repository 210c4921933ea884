// 该文件是 Sentinel （哨兵） 项目的一部分。
// src/input.rs - 视频/图像输入
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

use crate::{FromUrl, FromUrlWithScheme, frame::Frame};

mod read_image_file;
pub use self::read_image_file::{ImageFileInput, ImageFileInputError, apply_orientation};

#[cfg(feature = "gstreamer_input")]
mod gstreamer_input;
#[cfg(feature = "gstreamer_input")]
pub use self::gstreamer_input::{
  GStreamerInput, GStreamerInputError, GStreamerInputPipelineBuilder,
};

/// 媒体解码错误，只终止触发它的那一次请求
#[derive(Error, Debug)]
pub enum InputError {
  #[error("Image file input error: {0}")]
  ImageFileInputError(#[from] ImageFileInputError),
  #[cfg(feature = "gstreamer_input")]
  #[error("GStreamer input error: {0}")]
  GStreamerInputError(#[from] GStreamerInputError),
  #[error("Unsupported video file: {0}")]
  UnsupportedVideo(String),
  #[error("Video support is not compiled in (enable the `video` feature)")]
  VideoUnavailable,
  #[error("Decode error at frame {index}: {message}")]
  Decode { index: u64, message: String },
  #[error("URI scheme mismatch")]
  SchemeMismatch,
}

/// 视频源的预览信息
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VideoInfo {
  pub width: u32,
  pub height: u32,
  pub fps: f64,
  /// 容器报告的总帧数，未知时为 `None`
  pub total_frames: Option<u64>,
}

/// 按顺序产出帧的视频源；迭代结束即源耗尽
pub trait VideoSource: Iterator<Item = Result<Frame, InputError>> {
  fn info(&self) -> VideoInfo;
}

/// 按 URL 方案选择的输入
pub enum InputWrapper {
  ReadImageFile(ImageFileInput),
  #[cfg(feature = "gstreamer_input")]
  GStreamerInput(GStreamerInput),
}

impl FromUrl for InputWrapper {
  type Error = InputError;

  fn from_url(url: &url::Url) -> Result<Self, Self::Error> {
    if url.scheme() == ImageFileInput::SCHEME {
      let input = ImageFileInput::from_url(url)?;
      return Ok(InputWrapper::ReadImageFile(input));
    }
    #[cfg(feature = "gstreamer_input")]
    {
      if url.scheme() == GStreamerInputPipelineBuilder::SCHEME {
        let input = GStreamerInputPipelineBuilder::from_url(url)?.build()?;
        return Ok(InputWrapper::GStreamerInput(input));
      }
    }
    #[cfg(not(feature = "gstreamer_input"))]
    {
      if url.scheme() == "gst" {
        return Err(InputError::VideoUnavailable);
      }
    }
    Err(InputError::SchemeMismatch)
  }
}

impl Iterator for InputWrapper {
  type Item = Result<Frame, InputError>;

  fn next(&mut self) -> Option<Self::Item> {
    match self {
      InputWrapper::ReadImageFile(input) => input.next().map(Ok),
      #[cfg(feature = "gstreamer_input")]
      InputWrapper::GStreamerInput(input) => input.next(),
    }
  }
}

/// 打开视频文件作为视频源
#[cfg(feature = "gstreamer_input")]
pub fn open_video(path: &std::path::Path) -> Result<GStreamerInput, InputError> {
  if !crate::config::is_video_path(path) {
    return Err(InputError::UnsupportedVideo(path.display().to_string()));
  }
  if !path.exists() {
    return Err(InputError::UnsupportedVideo(format!(
      "{} (not found)",
      path.display()
    )));
  }
  Ok(GStreamerInputPipelineBuilder::new().file(path).build()?)
}

#[cfg(not(feature = "gstreamer_input"))]
pub fn open_video(path: &std::path::Path) -> Result<NoVideoSource, InputError> {
  if !crate::config::is_video_path(path) {
    return Err(InputError::UnsupportedVideo(path.display().to_string()));
  }
  Err(InputError::VideoUnavailable)
}

/// 未启用 GStreamer 时 `open_video` 的返回类型，永远不会被构造
#[cfg(not(feature = "gstreamer_input"))]
pub enum NoVideoSource {}

#[cfg(not(feature = "gstreamer_input"))]
impl Iterator for NoVideoSource {
  type Item = Result<Frame, InputError>;

  fn next(&mut self) -> Option<Self::Item> {
    match *self {}
  }
}

#[cfg(not(feature = "gstreamer_input"))]
impl VideoSource for NoVideoSource {
  fn info(&self) -> VideoInfo {
    match *self {}
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn unknown_scheme_is_rejected() {
    let url = url::Url::parse("ftp://host/file.png").unwrap();
    assert!(matches!(
      InputWrapper::from_url(&url),
      Err(InputError::SchemeMismatch)
    ));
  }

  #[test]
  fn open_video_rejects_other_extensions() {
    let err = open_video(std::path::Path::new("clip.mkv")).err();
    assert!(matches!(err, Some(InputError::UnsupportedVideo(_))));
  }
}
