// 该文件是 Sentinel （哨兵） 项目的一部分。
// src/output/gstreamer_live_output.rs - GStreamer 实时画面输出
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

//! 实时模式的画面输出：本地窗口或 RTP/UDP 推流。
//!
//! - `gstlive://display`
//! - `gstlive://192.168.1.20:5000`
//!
//! 管道在收到第一帧后才建立，分辨率取自该帧。

use std::{collections::HashMap, time::Instant};

use gstreamer::{self as gst, prelude::*};
use gstreamer_app as gst_app;
use gstreamer_video as gst_video;
use thiserror::Error;
use tracing::{error, info, warn};
use url::Url;

use super::gstreamer_video_output::{even_size, pack_frame};
use crate::{FromUrl, FromUrlWithScheme, frame::Frame, output::Render};

const DEFAULT_PORT: u16 = 5000;
const DEFAULT_FPS: i32 = 30;

#[derive(Error, Debug)]
pub enum GStreamerLiveOutputError {
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
  #[error("Pipeline error: {0}")]
  PipelineError(String),
  #[error("State change error: {0}")]
  StateChangeError(#[from] gst::StateChangeError),
  #[error("Buffer creation error")]
  BufferCreationError,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum LiveSink {
  Display,
  Udp { host: String, port: u16 },
}

impl LiveSink {
  /// x264 推流要求偶数宽高，本地窗口不需要
  fn layout_size(&self, width: u32, height: u32) -> (u32, u32) {
    match self {
      LiveSink::Display => (width, height),
      LiveSink::Udp { .. } => even_size(width, height),
    }
  }

  fn to_pipeline(&self) -> String {
    match self {
      LiveSink::Display => "videoconvert ! autovideosink sync=false".to_string(),
      LiveSink::Udp { host, port } => format!(
        "videoconvert ! video/x-raw,format=I420 ! \
         x264enc speed-preset=ultrafast tune=zerolatency bitrate=2000 ! \
         h264parse ! rtph264pay config-interval=1 pt=96 ! \
         udpsink host={} port={}",
        host, port
      ),
    }
  }
}

struct LivePipeline {
  pipeline: gst::Pipeline,
  appsrc: gst_app::AppSrc,
  layout: gst_video::VideoInfo,
  width: u32,
  height: u32,
}

/// 实时画面输出
pub struct GStreamerLiveOutput {
  sink: LiveSink,
  fps: i32,
  active: Option<LivePipeline>,
  started: Option<Instant>,
  frame_count: u64,
}

impl FromUrlWithScheme for GStreamerLiveOutput {
  const SCHEME: &'static str = "gstlive";
}

impl FromUrl for GStreamerLiveOutput {
  type Error = GStreamerLiveOutputError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      error!(
        "URI scheme mismatch: expected '{}', found '{}'",
        Self::SCHEME,
        url.scheme()
      );
      return Err(GStreamerLiveOutputError::SchemeMismatch);
    }

    let query: HashMap<_, _> = url.query_pairs().collect();
    let fps = query
      .get("fps")
      .and_then(|v| v.parse().ok())
      .unwrap_or(DEFAULT_FPS);

    let sink = match url.host_str() {
      Some("display") | None => LiveSink::Display,
      Some(host) => LiveSink::Udp {
        host: host.to_string(),
        port: url.port().unwrap_or(DEFAULT_PORT),
      },
    };

    Ok(Self {
      sink,
      fps,
      active: None,
      started: None,
      frame_count: 0,
    })
  }
}

impl GStreamerLiveOutput {
  fn start(&self, width: u32, height: u32) -> Result<LivePipeline, GStreamerLiveOutputError> {
    gst::init()?;

    let pipeline_desc = format!("appsrc name=src is-live=true ! {}", self.sink.to_pipeline());
    info!("Creating live output pipeline: {}", pipeline_desc);

    let pipeline = gst::parse::launch(&pipeline_desc)?
      .downcast::<gst::Pipeline>()
      .map_err(|_| {
        GStreamerLiveOutputError::PipelineError("Failed to create pipeline".to_string())
      })?;

    let appsrc = pipeline
      .by_name("src")
      .ok_or(GStreamerLiveOutputError::AppSrcNotFound)?
      .downcast::<gst_app::AppSrc>()
      .map_err(|_| GStreamerLiveOutputError::AppSrcConversionFailed)?;

    let (layout_width, layout_height) = self.sink.layout_size(width, height);
    let layout =
      gst_video::VideoInfo::builder(gst_video::VideoFormat::Rgb, layout_width, layout_height)
        .fps(gst::Fraction::new(self.fps, 1))
        .build()?;
    let caps = layout.to_caps()?;
    appsrc.set_caps(Some(&caps));
    appsrc.set_format(gst::Format::Time);

    pipeline.set_state(gst::State::Playing)?;

    if let LiveSink::Udp { host, port } = &self.sink {
      info!("Streaming RTP/H.264 to udp://{}:{}", host, port);
    }
    info!("Live output initialized: {}x{} @ {} fps", width, height, self.fps);

    Ok(LivePipeline {
      pipeline,
      appsrc,
      layout,
      width,
      height,
    })
  }

  fn push_frame(&mut self, frame: &Frame) -> Result<(), GStreamerLiveOutputError> {
    let needs_restart = self
      .active
      .as_ref()
      .is_none_or(|active| (active.width, active.height) != (frame.width(), frame.height()));
    if needs_restart {
      if self.active.is_some() {
        warn!("Frame size changed, rebuilding live output pipeline");
      }
      self.active = Some(self.start(frame.width(), frame.height())?);
      self.started = Some(Instant::now());
    }
    let Some(active) = self.active.as_ref() else {
      return Err(GStreamerLiveOutputError::PipelineError(
        "Live pipeline not started".to_string(),
      ));
    };

    let mut buffer = gst::Buffer::from_mut_slice(pack_frame(frame, &active.layout));
    {
      let buffer_ref = buffer
        .get_mut()
        .ok_or(GStreamerLiveOutputError::BufferCreationError)?;
      // 实时源按到达时间打时间戳
      let elapsed = self.started.map(|s| s.elapsed()).unwrap_or_default();
      buffer_ref.set_pts(gst::ClockTime::from_nseconds(elapsed.as_nanos() as u64));
    }

    active.appsrc.push_buffer(buffer).map_err(|e| {
      GStreamerLiveOutputError::PipelineError(format!("Failed to push buffer: {:?}", e))
    })?;
    self.frame_count += 1;

    Ok(())
  }
}

impl Drop for LivePipeline {
  fn drop(&mut self) {
    let _ = self.appsrc.end_of_stream();
    if let Err(e) = self.pipeline.set_state(gst::State::Null) {
      warn!("Failed to stop GStreamer live output pipeline: {}", e);
    }
  }
}

impl Drop for GStreamerLiveOutput {
  fn drop(&mut self) {
    info!(
      "Live output closed. Total frames shown: {}",
      self.frame_count
    );
  }
}

impl Render for GStreamerLiveOutput {
  type Error = GStreamerLiveOutputError;

  fn render_frame(&mut self, annotated: &Frame) -> Result<(), Self::Error> {
    self.push_frame(annotated)
  }
}
