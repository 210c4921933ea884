// 该文件是 Sentinel （哨兵） 项目的一部分。
// src/output/gstreamer_video_output.rs - GStreamer 视频文件输出
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

//! # GStreamer 视频文件输出模块
//!
//! 把标注后的帧编码为 MP4，分辨率与帧率跟随输入视频。
//!
//! 优先使用 H.264（`x264enc`），系统缺少该插件时退回 MPEG-4 Part 2
//! （`avenc_mpeg4`）。后者生成的文件可以下载，但浏览器一般无法直接播放，
//! 此时成品标记为 [`PreviewStatus::PreviewUnsupported`]。
//!
//! H.264 与 MPEG-4 都只接受偶数宽高，奇数尺寸的输入会在右侧和底部补一行黑边。
//!
//! ## URL Scheme
//!
//! `gstvideo:///path/to/video_procesado.mp4?width=1280&height=720&fps=25`

use std::{collections::HashMap, path::PathBuf};

use gstreamer::{self as gst, prelude::*};
use gstreamer_app as gst_app;
use gstreamer_video as gst_video;
use thiserror::Error;
use tracing::{error, info, warn};
use url::Url;

use crate::{
  FromUrl, FromUrlWithScheme,
  frame::{Frame, RGB_CHANNELS},
  output::{OutputError, PreviewStatus, Render, VideoArtifact, VideoSink},
};

const DEFAULT_WIDTH: u32 = 640;
const DEFAULT_HEIGHT: u32 = 480;
const DEFAULT_FPS: f64 = 30.0;
const EOS_TIMEOUT_SECS: u64 = 30;

/// GStreamer 视频输出错误类型
#[derive(Error, Debug)]
pub enum GStreamerVideoOutputError {
  #[error("URI scheme mismatch")]
  SchemeMismatch,
  #[error("GStreamer error: {0}")]
  GStreamerError(#[from] gst::glib::Error),
  #[error("GStreamer boolean error: {0}")]
  GStreamerBoolError(#[from] gst::glib::BoolError),
  #[error("Failed to get appsrc element")]
  AppSrcNotFound,
  #[error("Failed to convert element to appsrc")]
  AppSrcConversionFailed,
  /// 没有可用的视频编码器
  #[error("No usable video encoder (tried x264enc, avenc_mpeg4)")]
  EncoderUnavailable,
  #[error("Frame size {actual:?} does not match output size {expected:?}")]
  FrameSizeMismatch {
    expected: (u32, u32),
    actual: (u32, u32),
  },
  #[error("Pipeline error: {0}")]
  PipelineError(String),
  #[error("State change error: {0}")]
  StateChangeError(#[from] gst::StateChangeError),
  #[error("Buffer creation error")]
  BufferCreationError,
}

/// 编码器选择
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Encoder {
  H264,
  Mpeg4,
}

impl Encoder {
  fn detect() -> Option<Self> {
    if gst::ElementFactory::find("x264enc").is_some() {
      Some(Encoder::H264)
    } else if gst::ElementFactory::find("avenc_mpeg4").is_some() {
      warn!("x264enc not available, falling back to avenc_mpeg4");
      Some(Encoder::Mpeg4)
    } else {
      None
    }
  }

  fn to_pipeline(self) -> &'static str {
    match self {
      Encoder::H264 => "x264enc speed-preset=fast ! h264parse",
      Encoder::Mpeg4 => "avenc_mpeg4 ! mpeg4videoparse",
    }
  }

  fn preview(self) -> PreviewStatus {
    match self {
      Encoder::H264 => PreviewStatus::Playable,
      Encoder::Mpeg4 => PreviewStatus::PreviewUnsupported,
    }
  }
}

/// GStreamer 视频文件输出
///
/// `finish` 发送 EOS 并等待封装完成；未调用 `finish` 就被丢弃时管道直接停止，
/// 文件可能不完整。
pub struct GStreamerVideoOutput {
  pipeline: gst::Pipeline,
  appsrc: gst_app::AppSrc,
  path: PathBuf,
  width: u32,
  height: u32,
  /// 推入 appsrc 的缓冲区布局
  layout: gst_video::VideoInfo,
  fps: f64,
  encoder: Encoder,
  frame_count: u64,
}

impl FromUrlWithScheme for GStreamerVideoOutput {
  const SCHEME: &'static str = "gstvideo";
}

impl FromUrl for GStreamerVideoOutput {
  type Error = GStreamerVideoOutputError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      error!(
        "URI scheme mismatch: expected '{}', found '{}'",
        Self::SCHEME,
        url.scheme()
      );
      return Err(GStreamerVideoOutputError::SchemeMismatch);
    }

    let query: HashMap<_, _> = url.query_pairs().collect();
    let width = query
      .get("width")
      .and_then(|v| v.parse().ok())
      .unwrap_or(DEFAULT_WIDTH);
    let height = query
      .get("height")
      .and_then(|v| v.parse().ok())
      .unwrap_or(DEFAULT_HEIGHT);
    let fps = query
      .get("fps")
      .and_then(|v| v.parse().ok())
      .unwrap_or(DEFAULT_FPS);

    Self::new(url.path(), width, height, fps)
  }
}

impl GStreamerVideoOutput {
  pub fn new(
    path: impl Into<PathBuf>,
    width: u32,
    height: u32,
    fps: f64,
  ) -> Result<Self, GStreamerVideoOutputError> {
    gst::init()?;

    let path = path.into();
    let fps = if fps.is_finite() && fps > 0.0 {
      fps
    } else {
      DEFAULT_FPS
    };
    let encoder = Encoder::detect().ok_or(GStreamerVideoOutputError::EncoderUnavailable)?;

    let pipeline_desc = format!(
      "appsrc name=src ! videoconvert ! video/x-raw,format=I420 ! {} ! mp4mux ! filesink location=\"{}\"",
      encoder.to_pipeline(),
      path.display()
    );
    info!("Creating video output pipeline: {}", pipeline_desc);

    let pipeline = gst::parse::launch(&pipeline_desc)?
      .downcast::<gst::Pipeline>()
      .map_err(|_| {
        GStreamerVideoOutputError::PipelineError("Failed to create pipeline".to_string())
      })?;

    let appsrc = pipeline
      .by_name("src")
      .ok_or(GStreamerVideoOutputError::AppSrcNotFound)?
      .downcast::<gst_app::AppSrc>()
      .map_err(|_| GStreamerVideoOutputError::AppSrcConversionFailed)?;

    let framerate = gst::Fraction::approximate_f64(fps)
      .unwrap_or_else(|| gst::Fraction::new(fps.round() as i32, 1));
    let (encoded_width, encoded_height) = even_size(width, height);
    if (encoded_width, encoded_height) != (width, height) {
      warn!(
        "Odd frame size {}x{}, padding to {}x{} for the encoder",
        width, height, encoded_width, encoded_height
      );
    }
    let layout =
      gst_video::VideoInfo::builder(gst_video::VideoFormat::Rgb, encoded_width, encoded_height)
        .fps(framerate)
        .build()?;
    let caps = layout.to_caps()?;

    appsrc.set_caps(Some(&caps));
    appsrc.set_format(gst::Format::Time);

    pipeline.set_state(gst::State::Playing)?;

    info!(
      "Video output initialized: {}x{} @ {:.2} fps -> {}",
      width,
      height,
      fps,
      path.display()
    );

    Ok(Self {
      pipeline,
      appsrc,
      path,
      width,
      height,
      layout,
      fps,
      encoder,
      frame_count: 0,
    })
  }

  pub fn preview(&self) -> PreviewStatus {
    self.encoder.preview()
  }

  fn push_frame(&mut self, frame: &Frame) -> Result<(), GStreamerVideoOutputError> {
    if (frame.width(), frame.height()) != (self.width, self.height) {
      return Err(GStreamerVideoOutputError::FrameSizeMismatch {
        expected: (self.width, self.height),
        actual: (frame.width(), frame.height()),
      });
    }

    let mut buffer = gst::Buffer::from_mut_slice(pack_frame(frame, &self.layout));

    let frame_duration = 1e9 / self.fps;
    {
      let buffer_ref = buffer
        .get_mut()
        .ok_or(GStreamerVideoOutputError::BufferCreationError)?;
      let timestamp = (self.frame_count as f64 * frame_duration) as u64;
      buffer_ref.set_pts(gst::ClockTime::from_nseconds(timestamp));
      buffer_ref.set_duration(gst::ClockTime::from_nseconds(frame_duration as u64));
    }
    self.frame_count += 1;

    self.appsrc.push_buffer(buffer).map_err(|e| {
      GStreamerVideoOutputError::PipelineError(format!("Failed to push buffer: {:?}", e))
    })?;

    Ok(())
  }

  fn wait_for_eos(&self) -> Result<(), GStreamerVideoOutputError> {
    self.appsrc.end_of_stream().map_err(|e| {
      GStreamerVideoOutputError::PipelineError(format!("Failed to send EOS: {:?}", e))
    })?;

    let bus = self
      .pipeline
      .bus()
      .ok_or_else(|| GStreamerVideoOutputError::PipelineError("Pipeline has no bus".to_string()))?;
    let message = bus.timed_pop_filtered(
      gst::ClockTime::from_seconds(EOS_TIMEOUT_SECS),
      &[gst::MessageType::Eos, gst::MessageType::Error],
    );
    match message.as_ref().map(|m| m.view()) {
      Some(gst::MessageView::Eos(..)) => Ok(()),
      Some(gst::MessageView::Error(err)) => Err(GStreamerVideoOutputError::PipelineError(
        err.error().to_string(),
      )),
      _ => Err(GStreamerVideoOutputError::PipelineError(
        "Timed out waiting for EOS".to_string(),
      )),
    }
  }
}

/// 向上取偶数
pub(super) fn even_size(width: u32, height: u32) -> (u32, u32) {
  (width + width % 2, height + height % 2)
}

/// 按 `layout` 的行跨度排布帧数据
///
/// GStreamer 的 RGB 行按 4 字节对齐，紧密排列的 `width * 3` 字节不能直接推入。
/// 帧不能大于 `layout`，多出的行列保持为黑色。
pub(super) fn pack_frame(frame: &Frame, layout: &gst_video::VideoInfo) -> Vec<u8> {
  let row_bytes = frame.width() as usize * RGB_CHANNELS;
  let stride = layout.stride()[0] as usize;
  let mut data = vec![0u8; layout.size()];
  if row_bytes == 0 {
    return data;
  }
  for (y, row) in frame.as_nhwc().chunks_exact(row_bytes).enumerate() {
    let start = y * stride;
    data[start..start + row_bytes].copy_from_slice(row);
  }
  data
}

impl Drop for GStreamerVideoOutput {
  fn drop(&mut self) {
    if let Err(e) = self.pipeline.set_state(gst::State::Null) {
      warn!("Failed to stop GStreamer video output pipeline: {}", e);
    }
    info!(
      "Video output closed. Total frames written: {}",
      self.frame_count
    );
  }
}

impl Render for GStreamerVideoOutput {
  type Error = GStreamerVideoOutputError;

  fn render_frame(&mut self, annotated: &Frame) -> Result<(), Self::Error> {
    self.push_frame(annotated)
  }
}

impl VideoSink for GStreamerVideoOutput {
  fn write_frame(&mut self, annotated: &Frame) -> Result<(), OutputError> {
    Ok(self.push_frame(annotated)?)
  }

  fn finish(self) -> Result<VideoArtifact, OutputError> {
    self.wait_for_eos()?;
    let artifact = VideoArtifact {
      path: self.path.clone(),
      frames: self.frame_count,
      preview: self.preview(),
    };
    Ok(artifact)
  }
}
