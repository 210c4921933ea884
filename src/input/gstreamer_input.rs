// 该文件是 Sentinel （哨兵） 项目的一部分。
// src/input/gstreamer_input.rs - GStreamer 输入
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

//! # GStreamer 视频输入模块
//!
//! 支持两类视频源：
//! - 视频文件（MP4、AVI），逐帧按顺序解码，不丢帧
//! - V4L2 摄像头，用于实时模式，只保留最新的帧
//!
//! ## URL Scheme
//!
//! - `gst://file/path/to/video.mp4`
//! - `gst://camera/dev/video0?width=640&height=480&fps=30&rotate=90`
//!
//! ## 系统依赖
//!
//! **Ubuntu/Debian:**
//! ```bash
//! sudo apt-get install libgstreamer1.0-dev libgstreamer-plugins-base1.0-dev
//! ```
//!
//! 所有帧在 appsink 之前统一转换为 RGB。

use std::{collections::HashMap, path::Path};

use gstreamer::{self as gst, prelude::*};
use gstreamer_app as gst_app;
use gstreamer_video as gst_video;
use thiserror::Error;
use tracing::{debug, error, info, warn};
use url::Url;

use crate::{
  FromUrl, FromUrlWithScheme,
  frame::{Frame, RGB_CHANNELS},
  input::{InputError, VideoInfo, VideoSource},
};

const DEFAULT_CAMERA_FPS: u32 = 30;
const DEFAULT_FPS: f64 = 30.0;
const FIRST_SAMPLE_TIMEOUT_SECS: u64 = 10;

/// GStreamer 输入错误类型
#[derive(Error, Debug)]
pub enum GStreamerInputError {
  /// URI scheme 不匹配（期望 "gst://"）
  #[error("URI scheme mismatch")]
  SchemeMismatch,
  #[error("GStreamer error: {0}")]
  GStreamerError(#[from] gst::glib::Error),
  #[error("GStreamer boolean error: {0}")]
  GStreamerBoolError(#[from] gst::glib::BoolError),
  #[error("Failed to get appsink element")]
  AppSinkNotFound,
  #[error("Failed to convert element to appsink")]
  AppSinkConversionFailed,
  #[error("Failed to get video info from caps")]
  VideoInfoError,
  #[error("Unsupported video format")]
  UnsupportedFormat,
  /// 源在产出第一帧之前就结束或出错
  #[error("No frames could be decoded: {0}")]
  NoFrames(String),
  #[error("Pipeline error: {0}")]
  PipelineError(String),
  #[error("Buffer size mismatch: expected {expected} bytes, got {actual} bytes")]
  BufferSizeMismatch { expected: usize, actual: usize },
  #[error("State change error: {0}")]
  StateChangeError(#[from] gst::StateChangeError),
}

pub enum GStreamerInputBuilderItem {
  FileSource(String),
  CameraSource {
    camera: String,
    width: Option<u32>,
    height: Option<u32>,
    fps: u32,
  },
  VideoFlip {
    method: u32,
  },
}

impl GStreamerInputBuilderItem {
  fn to_pipeline(&self) -> String {
    match self {
      GStreamerInputBuilderItem::FileSource(path) => {
        format!("filesrc location=\"{}\" ! decodebin", path)
      }
      GStreamerInputBuilderItem::CameraSource {
        camera,
        width,
        height,
        fps,
      } => {
        let mut caps = format!("video/x-raw,framerate={}/1", fps);
        if let Some(width) = width {
          caps.push_str(&format!(",width={}", width));
        }
        if let Some(height) = height {
          caps.push_str(&format!(",height={}", height));
        }
        format!("v4l2src device={} ! {}", camera, caps)
      }
      GStreamerInputBuilderItem::VideoFlip { method } => {
        format!("videoflip method={}", method)
      }
    }
  }
}

/// GStreamer 输入管道构建器
#[derive(Default)]
pub struct GStreamerInputPipelineBuilder {
  items: Vec<GStreamerInputBuilderItem>,
  live: bool,
}

impl FromUrlWithScheme for GStreamerInputPipelineBuilder {
  const SCHEME: &'static str = "gst";
}

impl GStreamerInputPipelineBuilder {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn file(mut self, path: &Path) -> Self {
    self
      .items
      .push(GStreamerInputBuilderItem::FileSource(path.display().to_string()));
    self.live = false;
    self
  }

  pub fn camera(mut self, device: &str, width: Option<u32>, height: Option<u32>, fps: u32) -> Self {
    self.items.push(GStreamerInputBuilderItem::CameraSource {
      camera: device.to_string(),
      width,
      height,
      fps,
    });
    self.live = true;
    self
  }

  pub fn rotate(mut self, rotate: Option<&str>) -> Self {
    let method = match rotate {
      Some("90") => Some(1),
      Some("180") => Some(2),
      Some("270") => Some(3),
      _ => None,
    };
    if let Some(method) = method {
      self.items.push(GStreamerInputBuilderItem::VideoFlip { method });
    }
    self
  }

  pub fn build(self) -> Result<GStreamerInput, GStreamerInputError> {
    gst::init()?;

    let basic_pipeline = self
      .items
      .iter()
      .map(GStreamerInputBuilderItem::to_pipeline)
      .collect::<Vec<String>>()
      .join(" ! ");
    // 文件源必须保留所有帧，摄像头只关心最新帧
    let sink = if self.live {
      "appsink name=sink max-buffers=2 drop=true sync=false"
    } else {
      "appsink name=sink max-buffers=8 sync=false"
    };
    let full_pipeline = format!(
      "{} ! videoconvert ! video/x-raw,format=RGB ! {}",
      basic_pipeline, sink
    );

    info!("GStreamer pipeline description: {}", full_pipeline);

    let pipeline = gst::parse::launch(&full_pipeline)?
      .downcast::<gst::Pipeline>()
      .map_err(|_| GStreamerInputError::PipelineError("Failed to create pipeline".to_string()))?;

    let appsink = pipeline
      .by_name("sink")
      .ok_or(GStreamerInputError::AppSinkNotFound)?
      .downcast::<gst_app::AppSink>()
      .map_err(|_| GStreamerInputError::AppSinkConversionFailed)?;

    pipeline.set_state(gst::State::Playing)?;

    let mut input = GStreamerInput {
      pipeline,
      appsink,
      info: VideoInfo {
        width: 0,
        height: 0,
        fps: DEFAULT_FPS,
        total_frames: None,
      },
      pending: None,
      index: 0,
      finished: false,
    };
    input.prime(self.live)?;
    Ok(input)
  }
}

impl FromUrl for GStreamerInputPipelineBuilder {
  type Error = GStreamerInputError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      return Err(GStreamerInputError::SchemeMismatch);
    }

    let query: HashMap<String, String> = url
      .query_pairs()
      .map(|(k, v)| (String::from(k), String::from(v)))
      .collect();
    let rotate = query.get("rotate").map(String::as_str);

    let builder = match url.host_str() {
      Some("camera") => {
        let width = query.get("width").and_then(|v| v.parse().ok());
        let height = query.get("height").and_then(|v| v.parse().ok());
        let fps = query
          .get("fps")
          .and_then(|v| v.parse().ok())
          .unwrap_or(DEFAULT_CAMERA_FPS);
        Self::new().camera(url.path(), width, height, fps)
      }
      Some("file") => Self::new().file(Path::new(url.path())),
      _ => return Err(GStreamerInputError::SchemeMismatch),
    };

    Ok(builder.rotate(rotate))
  }
}

/// GStreamer 视频输入
///
/// 构建时会先取出第一帧以获得分辨率和帧率。
pub struct GStreamerInput {
  pipeline: gst::Pipeline,
  appsink: gst_app::AppSink,
  info: VideoInfo,
  pending: Option<Frame>,
  index: u64,
  finished: bool,
}

impl Drop for GStreamerInput {
  fn drop(&mut self) {
    if let Err(e) = self.pipeline.set_state(gst::State::Null) {
      warn!("Failed to stop GStreamer pipeline: {}", e);
    }
  }
}

impl GStreamerInput {
  fn prime(&mut self, live: bool) -> Result<(), GStreamerInputError> {
    let timeout = gst::ClockTime::from_seconds(FIRST_SAMPLE_TIMEOUT_SECS);
    let Some(sample) = self.appsink.try_pull_sample(timeout) else {
      let reason = self
        .pop_error()
        .unwrap_or_else(|| "stream ended before the first frame".to_string());
      return Err(GStreamerInputError::NoFrames(reason));
    };

    let caps = sample
      .caps()
      .ok_or_else(|| GStreamerInputError::PipelineError("No caps in sample".to_string()))?;
    let video_info =
      gst_video::VideoInfo::from_caps(caps).map_err(|_| GStreamerInputError::VideoInfoError)?;

    let fps = video_info.fps();
    let fps = if fps.numer() > 0 && fps.denom() > 0 {
      fps.numer() as f64 / fps.denom() as f64
    } else {
      DEFAULT_FPS
    };

    let total_frames = if live {
      None
    } else {
      self
        .pipeline
        .query_duration::<gst::ClockTime>()
        .map(|duration| (duration.nseconds() as f64 / 1e9 * fps).round() as u64)
        .filter(|frames| *frames > 0)
    };

    self.info = VideoInfo {
      width: video_info.width(),
      height: video_info.height(),
      fps,
      total_frames,
    };
    info!(
      "Video source opened: {}x{} @ {:.2} fps, frames: {:?}",
      self.info.width, self.info.height, self.info.fps, self.info.total_frames
    );

    self.pending = Some(convert_sample_to_frame(&sample)?);
    Ok(())
  }

  fn pop_error(&self) -> Option<String> {
    let bus = self.pipeline.bus()?;
    let message = bus.pop_filtered(&[gst::MessageType::Error])?;
    match message.view() {
      gst::MessageView::Error(err) => Some(format!(
        "{} ({})",
        err.error(),
        err.debug().map(|d| d.to_string()).unwrap_or_default()
      )),
      _ => None,
    }
  }
}

impl VideoSource for GStreamerInput {
  fn info(&self) -> VideoInfo {
    self.info
  }
}

impl Iterator for GStreamerInput {
  type Item = Result<Frame, InputError>;

  fn next(&mut self) -> Option<Self::Item> {
    if self.finished {
      return None;
    }
    if let Some(frame) = self.pending.take() {
      self.index += 1;
      return Some(Ok(frame));
    }

    match self.appsink.pull_sample() {
      Ok(sample) => {
        let index = self.index;
        self.index += 1;
        match convert_sample_to_frame(&sample) {
          Ok(frame) => Some(Ok(frame)),
          Err(e) => {
            error!("Failed to convert sample {}: {}", index, e);
            self.finished = true;
            Some(Err(InputError::Decode {
              index,
              message: e.to_string(),
            }))
          }
        }
      }
      Err(_) if self.appsink.is_eos() => {
        debug!("End of stream after {} frames", self.index);
        self.finished = true;
        None
      }
      Err(e) => {
        self.finished = true;
        let message = self.pop_error().unwrap_or_else(|| e.to_string());
        error!("Failed to pull sample: {}", message);
        Some(Err(InputError::Decode {
          index: self.index,
          message,
        }))
      }
    }
  }
}

fn convert_sample_to_frame(sample: &gst::Sample) -> Result<Frame, GStreamerInputError> {
  let buffer = sample
    .buffer()
    .ok_or_else(|| GStreamerInputError::PipelineError("No buffer in sample".to_string()))?;
  let caps = sample
    .caps()
    .ok_or_else(|| GStreamerInputError::PipelineError("No caps in sample".to_string()))?;

  let video_info =
    gst_video::VideoInfo::from_caps(caps).map_err(|_| GStreamerInputError::VideoInfoError)?;
  if video_info.format() != gst_video::VideoFormat::Rgb {
    return Err(GStreamerInputError::UnsupportedFormat);
  }

  let width = video_info.width() as usize;
  let height = video_info.height() as usize;
  let stride = video_info.stride()[0] as usize;
  let row_bytes = width * RGB_CHANNELS;

  let map = buffer.map_readable().map_err(|e| {
    GStreamerInputError::PipelineError(format!("Failed to map buffer for reading: {}", e))
  })?;
  let data = map.as_slice();

  let expected_size = stride * height.saturating_sub(1) + row_bytes;
  if data.len() < expected_size {
    return Err(GStreamerInputError::BufferSizeMismatch {
      expected: expected_size,
      actual: data.len(),
    });
  }

  // RGB 行按 4 字节对齐，逐行拷贝去掉填充
  let mut pixels = Vec::with_capacity(row_bytes * height);
  for row in 0..height {
    let start = row * stride;
    pixels.extend_from_slice(&data[start..start + row_bytes]);
  }

  Frame::new(width as u32, height as u32, pixels)
    .map_err(|e| GStreamerInputError::PipelineError(e.to_string()))
}
