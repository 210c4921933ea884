// 该文件是 Sentinel （哨兵） 项目的一部分。
// src/task.rs - 推理任务：单帧、图像、视频与实时模式
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
  sync::{
    Arc,
    mpsc::{Receiver, TryRecvError},
  },
  thread,
  time::{Duration, Instant},
};

use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::{
  aggregate::{ClassCounts, RunSummary, count},
  config::CONFIDENCE_THRESHOLD,
  frame::Frame,
  input::{InputError, VideoInfo, VideoSource},
  model::{Detection, InferError, ModelHandle},
  output::{OutputError, PreviewStatus, Render, VideoArtifact, VideoSink, draw::Annotator},
};

#[derive(Error, Debug)]
pub enum PipelineError {
  #[error("推理错误: {0}")]
  Infer(#[from] InferError),
  #[error("输入错误: {0}")]
  Input(#[from] InputError),
  #[error("输出错误: {0}")]
  Output(#[from] OutputError),
  #[error("状态 {state:?} 下不能执行 {action}")]
  InvalidTransition {
    state: VideoPhase,
    action: &'static str,
  },
  #[error("没有输入帧")]
  NoFrames,
  #[error("无法设置中断信号处理: {0}")]
  Signal(String),
}

/// 单帧的推理与标注结果
#[derive(Debug, Clone, PartialEq)]
pub struct FrameResult {
  pub annotated: Frame,
  pub detections: Vec<Detection>,
}

impl FrameResult {
  pub fn counts(&self) -> ClassCounts {
    count(&self.detections)
  }
}

/// 推理 → 标注
///
/// 克隆开销很小，模型与标注器都是共享的。
#[derive(Clone)]
pub struct FramePipeline {
  model: ModelHandle,
  annotator: Arc<Annotator>,
  confidence_threshold: f32,
}

impl FramePipeline {
  pub fn new(model: ModelHandle, annotator: Arc<Annotator>) -> Self {
    Self {
      model,
      annotator,
      confidence_threshold: CONFIDENCE_THRESHOLD,
    }
  }

  pub fn model(&self) -> &ModelHandle {
    &self.model
  }

  pub fn process(&self, frame: &Frame) -> Result<FrameResult, PipelineError> {
    let now = Instant::now();
    let detections = self.model.infer(frame, self.confidence_threshold)?;
    let elapsed = now.elapsed();
    let annotated = self.annotator.annotate(frame, &detections);
    debug!(
      "推理完成，检测到 {} 个目标，耗时: {:.2?}",
      detections.len(),
      elapsed
    );
    Ok(FrameResult {
      annotated,
      detections,
    })
  }

  /// 实时模式的同步回调
  ///
  /// 推理失败时记录日志并原样返回输入帧。
  pub fn live_callback(&self) -> impl Fn(Frame) -> Frame + Send + Sync + 'static {
    let pipeline = self.clone();
    move |frame: Frame| match pipeline.process(&frame) {
      Ok(result) => result.annotated,
      Err(e) => {
        warn!("实时帧推理失败，返回原始帧: {}", e);
        frame
      }
    }
  }
}

/// 图像模式的结果
#[derive(Debug, Clone)]
pub struct ImageReport {
  pub original: Frame,
  pub result: FrameResult,
  pub summary: RunSummary,
}

/// 图像模式：推理、标注与计数各一次
pub fn run_image(pipeline: &FramePipeline, original: Frame) -> Result<ImageReport, PipelineError> {
  info!(
    "开始分析图像 {}x{}",
    original.width(),
    original.height()
  );
  let result = pipeline.process(&original)?;
  let summary = RunSummary::from_counts(result.counts());
  info!(
    "图像分析完成: 共 {} 人，佩戴 {}，未佩戴 {}",
    summary.total_people, summary.compliant_count, summary.non_compliant_count
  );
  Ok(ImageReport {
    original,
    result,
    summary,
  })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VideoPhase {
  Idle,
  Loaded,
  Running,
  Done,
}

/// 视频处理进度
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Progress {
  pub current: u64,
  pub total: Option<u64>,
}

impl Progress {
  /// `current / total`，限制在 [0, 1]；总帧数未知时为 0
  pub fn fraction(&self) -> f32 {
    match self.total {
      Some(total) if total > 0 => (self.current as f32 / total as f32).clamp(0.0, 1.0),
      _ => 0.0,
    }
  }

  fn finished(frames: u64) -> Self {
    Self {
      current: frames,
      total: Some(frames),
    }
  }
}

/// 视频运行过程中的观察者，用于进度条与预览
pub trait ProgressObserver {
  fn on_phase(&mut self, _phase: VideoPhase) {}

  fn on_frame(&mut self, _progress: Progress, _result: &FrameResult) {}

  fn on_finished(&mut self, _progress: Progress) {}
}

impl ProgressObserver for () {}

/// 一次完成的视频运行
#[derive(Debug, Clone, PartialEq)]
pub struct VideoOutcome {
  pub summary: RunSummary,
  pub artifact: VideoArtifact,
}

impl VideoOutcome {
  pub fn preview(&self) -> PreviewStatus {
    self.artifact.preview
  }
}

enum VideoState<S> {
  Idle,
  Loaded { source: S, info: VideoInfo },
  Done(VideoOutcome),
}

/// 视频模式状态机：`Idle → Loaded → Running → Done`
///
/// `Running` 只存在于 [`VideoJob::start`] 调用期间。运行中出错时输入输出随栈展开释放，
/// 状态回到 `Idle`，错误返回给调用方。
pub struct VideoJob<S: VideoSource> {
  state: VideoState<S>,
}

impl<S: VideoSource> Default for VideoJob<S> {
  fn default() -> Self {
    Self {
      state: VideoState::Idle,
    }
  }
}

impl<S: VideoSource> VideoJob<S> {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn phase(&self) -> VideoPhase {
    match self.state {
      VideoState::Idle => VideoPhase::Idle,
      VideoState::Loaded { .. } => VideoPhase::Loaded,
      VideoState::Done(_) => VideoPhase::Done,
    }
  }

  pub fn info(&self) -> Option<VideoInfo> {
    match &self.state {
      VideoState::Loaded { info, .. } => Some(*info),
      _ => None,
    }
  }

  pub fn outcome(&self) -> Option<&VideoOutcome> {
    match &self.state {
      VideoState::Done(outcome) => Some(outcome),
      _ => None,
    }
  }

  /// 载入新的视频源，之前的结果被丢弃
  pub fn load(&mut self, source: S) -> VideoInfo {
    let info = source.info();
    info!(
      "载入视频: {}x{} @ {:.2} fps, 总帧数 {:?}",
      info.width, info.height, info.fps, info.total_frames
    );
    self.state = VideoState::Loaded { source, info };
    info
  }

  /// 开始处理，直到视频源耗尽
  ///
  /// `make_sink` 根据视频源的分辨率与帧率创建输出。
  pub fn start<O, F>(
    &mut self,
    pipeline: &FramePipeline,
    make_sink: F,
    observer: &mut dyn ProgressObserver,
  ) -> Result<VideoOutcome, PipelineError>
  where
    O: VideoSink,
    F: FnOnce(&VideoInfo) -> Result<O, OutputError>,
  {
    let (source, info) = match std::mem::replace(&mut self.state, VideoState::Idle) {
      VideoState::Loaded { source, info } => (source, info),
      other => {
        let state = match other {
          VideoState::Idle => VideoPhase::Idle,
          _ => VideoPhase::Done,
        };
        self.state = other;
        return Err(PipelineError::InvalidTransition {
          state,
          action: "start",
        });
      }
    };

    observer.on_phase(VideoPhase::Running);
    let outcome = match run_video(pipeline, source, info, make_sink, observer) {
      Ok(outcome) => outcome,
      Err(e) => {
        error!("视频处理中止: {}", e);
        observer.on_phase(VideoPhase::Idle);
        return Err(e);
      }
    };
    observer.on_phase(VideoPhase::Done);

    self.state = VideoState::Done(outcome.clone());
    Ok(outcome)
  }
}

fn run_video<S, O, F>(
  pipeline: &FramePipeline,
  source: S,
  info: VideoInfo,
  make_sink: F,
  observer: &mut dyn ProgressObserver,
) -> Result<VideoOutcome, PipelineError>
where
  S: VideoSource,
  O: VideoSink,
  F: FnOnce(&VideoInfo) -> Result<O, OutputError>,
{
  let mut sink = make_sink(&info)?;
  let mut summary = RunSummary::default();
  let mut current = 0u64;

  for frame in source {
    let frame = frame?;
    let result = pipeline.process(&frame)?;
    sink.write_frame(&result.annotated)?;
    summary.add_frame(result.counts());
    current += 1;

    let progress = Progress {
      current,
      total: info.total_frames,
    };
    debug!("处理第 {} 帧, 进度 {:.1}%", current, progress.fraction() * 100.0);
    observer.on_frame(progress, &result);
  }

  let artifact = sink.finish()?;
  observer.on_finished(Progress::finished(current));
  info!(
    "视频处理完成: {} 帧, 共 {} 人, 未佩戴 {}",
    summary.frames, summary.total_people, summary.non_compliant_count
  );

  Ok(VideoOutcome { summary, artifact })
}

/// 实时传输：把到达的每一帧交给回调，并把回调返回的帧送出
pub trait LiveTransport {
  /// 运行到源结束或收到停止信号，返回处理的帧数
  fn run(
    self,
    callback: &(dyn Fn(Frame) -> Frame + Send + Sync),
    stop: &Receiver<()>,
  ) -> Result<u64, PipelineError>;
}

/// 由帧迭代器与输出组成的传输
pub struct StreamTransport<I, O> {
  input: I,
  output: O,
}

impl<I, O> StreamTransport<I, O> {
  pub fn new(input: I, output: O) -> Self {
    Self { input, output }
  }
}

impl<I, O, E> LiveTransport for StreamTransport<I, O>
where
  I: Iterator<Item = Result<Frame, InputError>>,
  O: Render<Error = E>,
  OutputError: From<E>,
{
  fn run(
    mut self,
    callback: &(dyn Fn(Frame) -> Frame + Send + Sync),
    stop: &Receiver<()>,
  ) -> Result<u64, PipelineError> {
    info!("开始实时监控...");
    let mut frames = 0u64;
    let mut now = Instant::now();
    for frame in self.input.by_ref() {
      match stop.try_recv() {
        Ok(()) | Err(TryRecvError::Disconnected) => {
          warn!("中断信号接收，退出任务循环");
          break;
        }
        Err(TryRecvError::Empty) => {}
      }

      let annotated = callback(frame?);
      self
        .output
        .render_frame(&annotated)
        .map_err(OutputError::from)?;
      frames += 1;
      debug!("处理第 {} 帧，耗时: {:.2?}", frames, now.elapsed());
      now = Instant::now();
    }

    info!("实时监控结束，共处理 {} 帧", frames);
    Ok(frames)
  }
}

/// 安装 Ctrl-C 处理，返回停止信号
///
/// 收到信号 30 秒后仍未退出则强制结束进程。
pub fn install_stop_handler() -> Result<Receiver<()>, PipelineError> {
  let (tx, rx) = std::sync::mpsc::channel();
  ctrlc::set_handler(move || {
    info!("收到中断信号，准备退出...");
    let _ = tx.send(());
    thread::spawn(|| {
      thread::sleep(Duration::from_secs(30));
      warn!("强制退出程序");
      std::process::exit(1);
    });
  })
  .map_err(|e| PipelineError::Signal(e.to_string()))?;
  Ok(rx)
}

#[cfg(test)]
pub(crate) mod tests {
  use std::{
    path::PathBuf,
    sync::{
      Mutex,
      atomic::{AtomicUsize, Ordering},
    },
  };

  use super::*;
  use crate::model::{HelmetClass, Model, ModelLoadError};

  /// 按调用次数返回预设检测结果的模型
  pub(crate) struct ScriptedModel {
    frames: Vec<Vec<Detection>>,
    calls: AtomicUsize,
  }

  impl ScriptedModel {
    pub(crate) fn new(frames: Vec<Vec<Detection>>) -> Self {
      Self {
        frames,
        calls: AtomicUsize::new(0),
      }
    }
  }

  impl Model for ScriptedModel {
    fn name(&self) -> &'static str {
      "scripted"
    }

    fn infer(&self, _frame: &Frame, threshold: f32) -> Result<Vec<Detection>, InferError> {
      let call = self.calls.fetch_add(1, Ordering::SeqCst);
      let detections = self
        .frames
        .get(call % self.frames.len().max(1))
        .cloned()
        .unwrap_or_default();
      Ok(
        detections
          .into_iter()
          .filter(|d| d.confidence > threshold)
          .collect(),
      )
    }
  }

  pub(crate) fn det(class: HelmetClass, x: f32) -> Detection {
    Detection {
      class,
      confidence: 0.9,
      bbox: [x, 2.0, x + 10.0, 20.0],
    }
  }

  pub(crate) fn scripted_pipeline(frames: Vec<Vec<Detection>>) -> FramePipeline {
    let model: Box<dyn Model> = Box::new(ScriptedModel::new(frames));
    FramePipeline::new(
      ModelHandle::from_result("scripted.onnx", Ok(model)),
      Arc::new(Annotator::default()),
    )
  }

  pub(crate) fn broken_pipeline() -> FramePipeline {
    FramePipeline::new(
      ModelHandle::from_result(
        "missing.onnx",
        Err(ModelLoadError::NotFound("missing.onnx".to_string())),
      ),
      Arc::new(Annotator::default()),
    )
  }

  /// 内存中的视频源
  pub(crate) struct MemorySource {
    frames: std::vec::IntoIter<Result<Frame, InputError>>,
    info: VideoInfo,
  }

  impl MemorySource {
    pub(crate) fn new(count: usize, total_frames: Option<u64>) -> Self {
      let frames = (0..count)
        .map(|_| Ok(Frame::filled(32, 24, [30, 30, 30])))
        .collect::<Vec<_>>();
      Self::from_items(frames, total_frames)
    }

    pub(crate) fn from_items(
      items: Vec<Result<Frame, InputError>>,
      total_frames: Option<u64>,
    ) -> Self {
      Self {
        frames: items.into_iter(),
        info: VideoInfo {
          width: 32,
          height: 24,
          fps: 25.0,
          total_frames,
        },
      }
    }
  }

  impl Iterator for MemorySource {
    type Item = Result<Frame, InputError>;

    fn next(&mut self) -> Option<Self::Item> {
      self.frames.next()
    }
  }

  impl VideoSource for MemorySource {
    fn info(&self) -> VideoInfo {
      self.info
    }
  }

  /// 把帧数写入文件的输出
  pub(crate) struct MemorySink {
    path: PathBuf,
    pub(crate) frames: Vec<Frame>,
    preview: PreviewStatus,
  }

  impl MemorySink {
    pub(crate) fn new(path: PathBuf, preview: PreviewStatus) -> Self {
      Self {
        path,
        frames: Vec::new(),
        preview,
      }
    }
  }

  impl VideoSink for MemorySink {
    fn write_frame(&mut self, annotated: &Frame) -> Result<(), OutputError> {
      self.frames.push(annotated.clone());
      Ok(())
    }

    fn finish(self) -> Result<VideoArtifact, OutputError> {
      std::fs::write(&self.path, format!("{} frames", self.frames.len()))?;
      Ok(VideoArtifact {
        path: self.path,
        frames: self.frames.len() as u64,
        preview: self.preview,
      })
    }
  }

  #[derive(Default)]
  struct Recorder {
    phases: Vec<VideoPhase>,
    fractions: Vec<f32>,
    finished: Option<f32>,
  }

  impl ProgressObserver for Recorder {
    fn on_phase(&mut self, phase: VideoPhase) {
      self.phases.push(phase);
    }

    fn on_frame(&mut self, progress: Progress, _result: &FrameResult) {
      self.fractions.push(progress.fraction());
    }

    fn on_finished(&mut self, progress: Progress) {
      self.finished = Some(progress.fraction());
    }
  }

  #[test]
  fn image_counts_are_consistent() {
    let pipeline = scripted_pipeline(vec![vec![
      det(HelmetClass::Helmet, 0.0),
      det(HelmetClass::Helmet, 20.0),
      det(HelmetClass::NoHelmet, 40.0),
    ]]);
    let report = run_image(&pipeline, Frame::filled(64, 32, [0, 0, 0])).unwrap();
    assert_eq!(report.summary.total_people, 3);
    assert_eq!(report.summary.compliant_count, 2);
    assert_eq!(report.summary.non_compliant_count, 1);
    assert_eq!(
      report.summary.compliant_count + report.summary.non_compliant_count,
      report.summary.total_people
    );
    assert_ne!(report.result.annotated, report.original);
  }

  #[test]
  fn video_run_sums_frames_and_ends_at_full_progress() {
    let dir = tempfile::tempdir().unwrap();
    let pipeline = scripted_pipeline(vec![
      vec![det(HelmetClass::Helmet, 0.0)],
      vec![det(HelmetClass::Helmet, 0.0), det(HelmetClass::NoHelmet, 15.0)],
      vec![],
    ]);

    let mut job = VideoJob::new();
    assert_eq!(job.phase(), VideoPhase::Idle);
    // 容器报告的帧数偏小，进度也不能超过 1
    job.load(MemorySource::new(6, Some(4)));
    assert_eq!(job.phase(), VideoPhase::Loaded);

    let mut recorder = Recorder::default();
    let output = dir.path().join("video_procesado.mp4");
    let outcome = job
      .start(
        &pipeline,
        |info| {
          assert_eq!((info.width, info.height), (32, 24));
          Ok(MemorySink::new(output.clone(), PreviewStatus::Playable))
        },
        &mut recorder,
      )
      .unwrap();

    assert_eq!(outcome.summary.frames, 6);
    assert_eq!(outcome.summary.total_people, 6);
    assert_eq!(outcome.summary.non_compliant_count, 2);
    assert_eq!(outcome.artifact.frames, 6);
    assert!(outcome.artifact.path.exists());
    assert_eq!(job.phase(), VideoPhase::Done);

    assert!(recorder.fractions.iter().all(|f| (0.0..=1.0).contains(f)));
    assert!(recorder.fractions.windows(2).all(|w| w[0] <= w[1]));
    assert_eq!(recorder.finished, Some(1.0));
    assert_eq!(
      recorder.phases,
      vec![VideoPhase::Running, VideoPhase::Done]
    );
  }

  #[test]
  fn ten_compliant_frames_produce_artifact() {
    let dir = tempfile::tempdir().unwrap();
    let pipeline = scripted_pipeline(vec![vec![det(HelmetClass::Helmet, 0.0)]]);
    let mut job = VideoJob::new();
    job.load(MemorySource::new(10, Some(10)));

    let path = dir.path().join("video_procesado.mp4");
    let outcome = job
      .start(
        &pipeline,
        |_| Ok(MemorySink::new(path.clone(), PreviewStatus::Playable)),
        &mut (),
      )
      .unwrap();

    assert_eq!(outcome.summary.non_compliant_count, 0);
    assert_eq!(outcome.summary.frames, 10);
    assert_eq!(outcome.preview(), PreviewStatus::Playable);
    assert_eq!(std::fs::read_to_string(&path).unwrap(), "10 frames");
  }

  #[test]
  fn decode_error_aborts_run() {
    let dir = tempfile::tempdir().unwrap();
    let pipeline = scripted_pipeline(vec![vec![]]);
    let items = vec![
      Ok(Frame::filled(32, 24, [0, 0, 0])),
      Err(InputError::Decode {
        index: 1,
        message: "corrupt packet".to_string(),
      }),
      Ok(Frame::filled(32, 24, [0, 0, 0])),
    ];
    let mut job = VideoJob::new();
    job.load(MemorySource::from_items(items, Some(3)));

    let path = dir.path().join("video_procesado.mp4");
    let result = job.start(
      &pipeline,
      |_| Ok(MemorySink::new(path.clone(), PreviewStatus::Playable)),
      &mut (),
    );
    assert!(matches!(
      result,
      Err(PipelineError::Input(InputError::Decode { index: 1, .. }))
    ));
    assert_eq!(job.phase(), VideoPhase::Idle);
    assert!(!path.exists());
  }

  #[test]
  fn start_requires_loaded_video() {
    let pipeline = scripted_pipeline(vec![vec![]]);
    let mut job: VideoJob<MemorySource> = VideoJob::new();
    let result = job.start(
      &pipeline,
      |_| -> Result<MemorySink, OutputError> { Err(OutputError::VideoUnavailable) },
      &mut (),
    );
    assert!(matches!(
      result,
      Err(PipelineError::InvalidTransition {
        state: VideoPhase::Idle,
        ..
      })
    ));
  }

  #[test]
  fn progress_fraction_is_clamped() {
    let over = Progress {
      current: 12,
      total: Some(10),
    };
    assert_eq!(over.fraction(), 1.0);
    let unknown = Progress {
      current: 3,
      total: None,
    };
    assert_eq!(unknown.fraction(), 0.0);
    assert_eq!(Progress::finished(0).fraction(), 0.0);
    assert_eq!(Progress::finished(7).fraction(), 1.0);
  }

  #[test]
  fn live_callback_returns_original_frame_on_error() {
    let callback = broken_pipeline().live_callback();
    let frame = Frame::filled(16, 16, [9, 9, 9]);
    assert_eq!(callback(frame.clone()), frame);

    let callback = scripted_pipeline(vec![vec![det(HelmetClass::NoHelmet, 0.0)]]).live_callback();
    assert_ne!(callback(frame.clone()), frame);
  }

  struct CollectingOutput(Arc<Mutex<Vec<Frame>>>);

  impl Render for CollectingOutput {
    type Error = OutputError;

    fn render_frame(&mut self, annotated: &Frame) -> Result<(), Self::Error> {
      self.0.lock().unwrap().push(annotated.clone());
      Ok(())
    }
  }

  #[test]
  fn stream_transport_runs_callback_per_frame() {
    let shown = Arc::new(Mutex::new(Vec::new()));
    let input = MemorySource::new(5, None);
    let transport = StreamTransport::new(input, CollectingOutput(shown.clone()));
    let (_tx, rx) = std::sync::mpsc::channel();

    let pipeline = scripted_pipeline(vec![vec![det(HelmetClass::Helmet, 0.0)]]);
    let callback = pipeline.live_callback();
    let frames = transport.run(&callback, &rx).unwrap();

    assert_eq!(frames, 5);
    assert_eq!(shown.lock().unwrap().len(), 5);
  }

  #[test]
  fn stream_transport_stops_on_signal() {
    let shown = Arc::new(Mutex::new(Vec::new()));
    let transport = StreamTransport::new(MemorySource::new(5, None), CollectingOutput(shown.clone()));
    let (tx, rx) = std::sync::mpsc::channel();
    tx.send(()).unwrap();

    let callback = |frame: Frame| frame;
    assert_eq!(transport.run(&callback, &rx).unwrap(), 0);
    assert!(shown.lock().unwrap().is_empty());
  }
}
