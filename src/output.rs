// 该文件是 Sentinel （哨兵） 项目的一部分。
// src/output.rs - 输出定义
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

use thiserror::Error;
use url::Url;

#[cfg(feature = "gstreamer_output")]
use crate::FromUrlWithScheme;
use crate::{FromUrl, config::OUTPUT_VIDEO_FILE_NAME, frame::Frame, input::VideoInfo};

/// 输出一帧已标注的图像
pub trait Render {
  type Error;
  fn render_frame(&mut self, annotated: &Frame) -> Result<(), Self::Error>;
}

/// 逐帧写入、结束时交付成品文件的视频输出
pub trait VideoSink {
  fn write_frame(&mut self, annotated: &Frame) -> Result<(), OutputError>;

  fn finish(self) -> Result<VideoArtifact, OutputError>
  where
    Self: Sized;
}

pub mod draw;

mod save_image_file;
pub use self::save_image_file::{SaveImageFileError, SaveImageFileOutput};

#[cfg(feature = "gstreamer_output")]
mod gstreamer_video_output;
#[cfg(feature = "gstreamer_output")]
pub use self::gstreamer_video_output::{GStreamerVideoOutput, GStreamerVideoOutputError};

#[cfg(feature = "gstreamer_output")]
mod gstreamer_live_output;
#[cfg(feature = "gstreamer_output")]
pub use self::gstreamer_live_output::{GStreamerLiveOutput, GStreamerLiveOutputError};

#[derive(Error, Debug)]
pub enum OutputError {
  #[error("保存图像文件错误: {0}")]
  SaveImageFileError(#[from] SaveImageFileError),
  #[cfg(feature = "gstreamer_output")]
  #[error("GStreamer 视频输出错误: {0}")]
  GStreamerVideoOutputError(#[from] GStreamerVideoOutputError),
  #[cfg(feature = "gstreamer_output")]
  #[error("GStreamer 实时输出错误: {0}")]
  GStreamerLiveOutputError(#[from] GStreamerLiveOutputError),
  #[error("I/O 错误: {0}")]
  IoError(#[from] std::io::Error),
  #[error("当前构建未启用视频输出")]
  VideoUnavailable,
  #[error("URI 方案不匹配")]
  SchemeMismatch,
}

/// 成品视频能否直接预览
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PreviewStatus {
  Playable,
  /// 使用了后备编码器，容器仍可下载，但多数播放器无法直接预览
  PreviewUnsupported,
}

/// 处理完成的视频文件
#[derive(Debug, Clone, PartialEq)]
pub struct VideoArtifact {
  pub path: PathBuf,
  pub frames: u64,
  pub preview: PreviewStatus,
}

impl VideoArtifact {
  /// 提供下载时使用的固定文件名
  pub fn file_name(&self) -> &'static str {
    OUTPUT_VIDEO_FILE_NAME
  }

  /// 把成品复制到 `dir` 下，文件名固定
  pub fn deliver_to(&self, dir: &Path) -> Result<PathBuf, OutputError> {
    std::fs::create_dir_all(dir)?;
    let target = dir.join(self.file_name());
    if target != self.path {
      std::fs::copy(&self.path, &target)?;
    }
    Ok(target)
  }
}

/// 按视频源的分辨率与帧率创建视频文件输出
#[cfg(feature = "gstreamer_output")]
pub fn create_video_sink(path: &Path, info: &VideoInfo) -> Result<impl VideoSink + use<>, OutputError> {
  Ok(GStreamerVideoOutput::new(
    path,
    info.width,
    info.height,
    info.fps,
  )?)
}

#[cfg(not(feature = "gstreamer_output"))]
pub fn create_video_sink(_path: &Path, _info: &VideoInfo) -> Result<impl VideoSink + use<>, OutputError> {
  Err::<NoVideoSink, _>(OutputError::VideoUnavailable)
}

/// 未启用 GStreamer 输出时 `create_video_sink` 的返回类型，永远不会被构造
#[cfg(not(feature = "gstreamer_output"))]
pub enum NoVideoSink {}

#[cfg(not(feature = "gstreamer_output"))]
impl VideoSink for NoVideoSink {
  fn write_frame(&mut self, _annotated: &Frame) -> Result<(), OutputError> {
    match *self {}
  }

  fn finish(self) -> Result<VideoArtifact, OutputError> {
    match self {}
  }
}

/// 按 URL 方案选择的输出
pub enum OutputWrapper {
  SaveImageFileOutput(SaveImageFileOutput),
  #[cfg(feature = "gstreamer_output")]
  GStreamerVideoOutput(GStreamerVideoOutput),
  #[cfg(feature = "gstreamer_output")]
  GStreamerLiveOutput(GStreamerLiveOutput),
}

impl FromUrl for OutputWrapper {
  type Error = OutputError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    match url.scheme() {
      "image" => Ok(OutputWrapper::SaveImageFileOutput(
        SaveImageFileOutput::from_url(url)?,
      )),
      #[cfg(feature = "gstreamer_output")]
      GStreamerVideoOutput::SCHEME => Ok(OutputWrapper::GStreamerVideoOutput(
        GStreamerVideoOutput::from_url(url)?,
      )),
      #[cfg(feature = "gstreamer_output")]
      GStreamerLiveOutput::SCHEME => Ok(OutputWrapper::GStreamerLiveOutput(
        GStreamerLiveOutput::from_url(url)?,
      )),
      #[cfg(not(feature = "gstreamer_output"))]
      "gstvideo" | "gstlive" => Err(OutputError::VideoUnavailable),
      _ => Err(OutputError::SchemeMismatch),
    }
  }
}

impl Render for OutputWrapper {
  type Error = OutputError;

  fn render_frame(&mut self, annotated: &Frame) -> Result<(), Self::Error> {
    match self {
      OutputWrapper::SaveImageFileOutput(output) => output
        .render_frame(annotated)
        .map_err(OutputError::from),
      #[cfg(feature = "gstreamer_output")]
      OutputWrapper::GStreamerVideoOutput(output) => output
        .render_frame(annotated)
        .map_err(OutputError::from),
      #[cfg(feature = "gstreamer_output")]
      OutputWrapper::GStreamerLiveOutput(output) => output
        .render_frame(annotated)
        .map_err(OutputError::from),
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn artifact_is_delivered_under_fixed_name() {
    let work = tempfile::tempdir().unwrap();
    let source = work.path().join("tmp_encode.mp4");
    std::fs::write(&source, b"mp4").unwrap();
    let artifact = VideoArtifact {
      path: source,
      frames: 3,
      preview: PreviewStatus::Playable,
    };

    let downloads = work.path().join("descargas");
    let delivered = artifact.deliver_to(&downloads).unwrap();
    assert_eq!(delivered, downloads.join("video_procesado.mp4"));
    assert_eq!(std::fs::read(delivered).unwrap(), b"mp4");
  }

  #[test]
  fn unknown_output_scheme_is_rejected() {
    let url = Url::parse("ftp://host/out.png").unwrap();
    assert!(matches!(
      OutputWrapper::from_url(&url),
      Err(OutputError::SchemeMismatch)
    ));
  }
}
