// 该文件是 Sentinel （哨兵） 项目的一部分。
// src/page.rs - 页面路由与渲染
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

//! 四个页面（首页、图像、视频、实时）的渲染。
//!
//! 页面由 [`Page`] 选择，[`render`] 在显式的 [`AppState`] 上生成 [`PageView`]。
//! 段落在生成时即推送给 [`PageObserver`]，命令行据此逐段输出。
//! 界面文字为西班牙语。

use std::{
  fmt,
  path::{Path, PathBuf},
  sync::Arc,
};

use anyhow::Result;
use serde_json::{Value, json};
use tracing::{error, info};
use url::Url;

use crate::{
  FromUrl,
  aggregate::{ComplianceState, RunSummary},
  config::OUTPUT_VIDEO_FILE_NAME,
  input::{ImageFileInput, InputWrapper, open_video},
  model::{self, ModelHandle},
  output::{
    OutputWrapper, PreviewStatus, Render, SaveImageFileOutput, create_video_sink,
    draw::Annotator,
  },
  task::{
    FramePipeline, FrameResult, LiveTransport, Progress, ProgressObserver, StreamTransport,
    VideoJob, VideoPhase, install_stop_handler, run_image,
  },
};

pub const LABEL_TOTAL: &str = "Total Personas";
pub const LABEL_COMPLIANT: &str = "Con Casco";
pub const LABEL_NON_COMPLIANT: &str = "Sin Casco";

/// 所有页面共享的状态
///
/// 模型句柄在创建时加载一次，加载失败也会保留在这里，各页面据此显示错误。
pub struct AppState {
  model: ModelHandle,
  annotator: Arc<Annotator>,
}

impl AppState {
  pub fn new(model: ModelHandle, annotator: Annotator) -> Self {
    Self {
      model,
      annotator: Arc::new(annotator),
    }
  }

  pub fn load(model_path: &Path, font: Option<&Path>) -> Self {
    Self::new(model::load(model_path), Annotator::with_font(font))
  }

  pub fn model(&self) -> &ModelHandle {
    &self.model
  }

  pub fn pipeline(&self) -> FramePipeline {
    FramePipeline::new(self.model.clone(), self.annotator.clone())
  }

  fn model_notice(&self) -> Option<Notice> {
    self.model.error().map(|e| {
      Notice::error(format!(
        "Error cargando el modelo: {}. Asegúrese de que '{}' esté en la carpeta.",
        e,
        self.model.path().display()
      ))
    })
  }
}

/// 当前页面及其输入
#[derive(Debug, Clone, PartialEq)]
pub enum Page {
  Home,
  Image {
    input: PathBuf,
    output: PathBuf,
  },
  Video {
    input: PathBuf,
    output_dir: PathBuf,
  },
  Live {
    source: Url,
    sink: Url,
  },
}

impl Page {
  pub fn title(&self) -> &'static str {
    match self {
      Page::Home => "Inicio",
      Page::Image { .. } => "Análisis de Imágenes",
      Page::Video { .. } => "Procesamiento de Video",
      Page::Live { .. } => "Monitoreo en Tiempo Real",
    }
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoticeLevel {
  Info,
  Success,
  Warning,
  Error,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notice {
  pub level: NoticeLevel,
  pub message: String,
}

impl Notice {
  pub fn info(message: impl Into<String>) -> Self {
    Self {
      level: NoticeLevel::Info,
      message: message.into(),
    }
  }

  pub fn success(message: impl Into<String>) -> Self {
    Self {
      level: NoticeLevel::Success,
      message: message.into(),
    }
  }

  pub fn warning(message: impl Into<String>) -> Self {
    Self {
      level: NoticeLevel::Warning,
      message: message.into(),
    }
  }

  pub fn error(message: impl Into<String>) -> Self {
    Self {
      level: NoticeLevel::Error,
      message: message.into(),
    }
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Metric {
  pub label: &'static str,
  pub value: u64,
}

/// 页面中的一个段落
#[derive(Debug, Clone, PartialEq)]
pub enum Section {
  Heading(String),
  Text(String),
  Metrics(Vec<Metric>),
  Notice(Notice),
  Image { label: String, path: PathBuf },
  Artifact {
    label: String,
    file_name: String,
    path: PathBuf,
  },
}

impl Section {
  fn text(text: impl Into<String>) -> Self {
    Section::Text(text.into())
  }

  fn heading(text: impl Into<String>) -> Self {
    Section::Heading(text.into())
  }

  fn to_json(&self) -> Value {
    match self {
      Section::Heading(text) => json!({ "type": "heading", "text": text }),
      Section::Text(text) => json!({ "type": "text", "text": text }),
      Section::Metrics(metrics) => json!({
        "type": "metrics",
        "values": metrics
          .iter()
          .map(|m| json!({ "label": m.label, "value": m.value }))
          .collect::<Vec<_>>(),
      }),
      Section::Notice(notice) => json!({
        "type": "notice",
        "level": format!("{:?}", notice.level).to_lowercase(),
        "message": notice.message,
      }),
      Section::Image { label, path } => json!({
        "type": "image",
        "label": label,
        "path": path.display().to_string(),
      }),
      Section::Artifact {
        label,
        file_name,
        path,
      } => json!({
        "type": "artifact",
        "label": label,
        "file_name": file_name,
        "path": path.display().to_string(),
      }),
    }
  }
}

impl fmt::Display for Section {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      Section::Heading(text) => write!(f, "### {}", text),
      Section::Text(text) => write!(f, "{}", text),
      Section::Metrics(metrics) => {
        let line = metrics
          .iter()
          .map(|m| format!("{}: {}", m.label, m.value))
          .collect::<Vec<_>>()
          .join(" | ");
        write!(f, "{}", line)
      }
      Section::Notice(notice) => {
        let tag = match notice.level {
          NoticeLevel::Info => "[INFO]",
          NoticeLevel::Success => "[OK]",
          NoticeLevel::Warning => "[AVISO]",
          NoticeLevel::Error => "[ERROR]",
        };
        write!(f, "{} {}", tag, notice.message)
      }
      Section::Image { label, path } => write!(f, "{}: {}", label, path.display()),
      Section::Artifact {
        label,
        file_name,
        path,
      } => write!(f, "{} ({}): {}", label, file_name, path.display()),
    }
  }
}

/// 渲染好的页面
#[derive(Debug, Clone, PartialEq)]
pub struct PageView {
  pub title: &'static str,
  pub sections: Vec<Section>,
}

impl PageView {
  pub fn notices(&self) -> impl Iterator<Item = &Notice> {
    self.sections.iter().filter_map(|s| match s {
      Section::Notice(notice) => Some(notice),
      _ => None,
    })
  }

  pub fn has_error(&self) -> bool {
    self.notices().any(|n| n.level == NoticeLevel::Error)
  }

  pub fn metric(&self, label: &str) -> Option<u64> {
    self.sections.iter().find_map(|s| match s {
      Section::Metrics(metrics) => metrics.iter().find(|m| m.label == label).map(|m| m.value),
      _ => None,
    })
  }

  pub fn to_json(&self) -> Value {
    json!({
      "page": self.title,
      "generated_at": chrono::Local::now().to_rfc3339(),
      "sections": self.sections.iter().map(Section::to_json).collect::<Vec<_>>(),
    })
  }
}

impl fmt::Display for PageView {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    writeln!(f, "## {}", self.title)?;
    for section in &self.sections {
      writeln!(f, "{}", section)?;
    }
    Ok(())
  }
}

/// 页面渲染过程的观察者
pub trait PageObserver: ProgressObserver {
  fn on_section(&mut self, _section: &Section) {}
}

impl PageObserver for () {}

struct ViewBuilder<'a> {
  view: PageView,
  observer: &'a mut dyn PageObserver,
}

impl<'a> ViewBuilder<'a> {
  fn new(title: &'static str, observer: &'a mut dyn PageObserver) -> Self {
    Self {
      view: PageView {
        title,
        sections: Vec::new(),
      },
      observer,
    }
  }

  fn push(&mut self, section: Section) {
    self.observer.on_section(&section);
    self.view.sections.push(section);
  }

  fn notice(&mut self, notice: Notice) {
    self.push(Section::Notice(notice));
  }

  fn finish(self) -> PageView {
    self.view
  }
}

/// 把视频进度转发给页面观察者
struct ForwardProgress<'a, 'b>(&'a mut ViewBuilder<'b>);

impl ProgressObserver for ForwardProgress<'_, '_> {
  fn on_phase(&mut self, phase: VideoPhase) {
    self.0.observer.on_phase(phase);
  }

  fn on_frame(&mut self, progress: Progress, result: &FrameResult) {
    self.0.observer.on_frame(progress, result);
  }

  fn on_finished(&mut self, progress: Progress) {
    self.0.observer.on_finished(progress);
  }
}

/// 渲染一个页面
///
/// 模型不可用、媒体无法解码、结果无法写入等请求级错误都以错误提示的形式
/// 出现在页面中，不会作为 `Err` 返回。
pub fn render(state: &AppState, page: Page, observer: &mut dyn PageObserver) -> Result<PageView> {
  let mut view = ViewBuilder::new(page.title(), observer);
  info!("渲染页面: {}", page.title());

  if let Page::Home = page {
    render_home(state, &mut view);
    return Ok(view.finish());
  }

  if let Some(notice) = state.model_notice() {
    error!("模型不可用: {}", notice.message);
    view.notice(notice);
    return Ok(view.finish());
  }

  match page {
    Page::Home => {}
    Page::Image { input, output } => render_image(state, &input, &output, &mut view),
    Page::Video { input, output_dir } => render_video(state, &input, &output_dir, &mut view),
    Page::Live { source, sink } => render_live(state, &source, &sink, &mut view),
  }

  Ok(view.finish())
}

fn render_home(state: &AppState, view: &mut ViewBuilder<'_>) {
  view.push(Section::heading("Sentinel"));
  view.push(Section::text(
    "Sistema Inteligente de Detección de Cascos de Seguridad",
  ));
  view.push(Section::heading("Bienvenido a Sentinel"));
  view.push(Section::text(
    "Bienvenido al sistema de seguridad industrial asistido por Inteligencia Artificial. \
     Esta plataforma ha sido diseñada para auditar y monitorear el cumplimiento de normas de \
     seguridad, específicamente el uso de cascos de seguridad, en entornos laborales de manera \
     eficiente y moderna.",
  ));
  view.push(Section::heading("Características Principales"));
  view.push(Section::text(
    "1. Detección Automática: Utiliza algoritmos de visión por computadora (YOLOv8) de última generación.",
  ));
  view.push(Section::text(
    "2. Multi-formato: Para analizar fotografías estáticas, archivos de video y transmisiones en tiempo real.",
  ));
  view.push(Section::text(
    "3. Reportes Inmediatos: Visualización clara de métricas de cumplimiento e incumplimiento.",
  ));
  view.push(Section::heading("Instrucciones"));
  view.push(Section::text(
    "1. Seleccione el modo de trabajo con los subcomandos `image`, `video` o `live`.",
  ));
  view.push(Section::text(
    "2. Indique el archivo correspondiente o el dispositivo de la cámara.",
  ));
  view.push(Section::text(
    "3. Observe los resultados. Las alertas rojas indican personas sin casco.",
  ));

  match state.model_notice() {
    Some(notice) => view.notice(notice),
    None => view.notice(Notice::success("Estado del Sistema: En Línea")),
  }
}

fn metrics_section(summary: &RunSummary) -> Section {
  Section::Metrics(vec![
    Metric {
      label: LABEL_TOTAL,
      value: summary.total_people,
    },
    Metric {
      label: LABEL_COMPLIANT,
      value: summary.compliant_count,
    },
    Metric {
      label: LABEL_NON_COMPLIANT,
      value: summary.non_compliant_count,
    },
  ])
}

fn compliance_notice(summary: &RunSummary) -> Notice {
  match summary.state() {
    ComplianceState::Alert { non_compliant } => Notice::error(format!(
      "ALERTA: Se han detectado {} personas sin casco de seguridad.",
      non_compliant
    )),
    ComplianceState::Safe => Notice::success("Zona Segura: Todo el personal cuenta con casco."),
  }
}

fn render_image(
  state: &AppState,
  input: &Path,
  output: &Path,
  view: &mut ViewBuilder<'_>,
) {
  let original = match ImageFileInput::open(input) {
    Ok(mut image) => image.next(),
    Err(e) => {
      error!("无法读取图像 {}: {}", input.display(), e);
      view.notice(Notice::error(format!(
        "No se pudo leer la imagen '{}': {}",
        input.display(),
        e
      )));
      return;
    }
  };
  let Some(original) = original else {
    view.notice(Notice::error("La imagen no contiene datos."));
    return;
  };

  view.push(Section::Image {
    label: "Imagen Original".to_string(),
    path: input.to_path_buf(),
  });

  let report = match run_image(&state.pipeline(), original) {
    Ok(report) => report,
    Err(e) => {
      view.notice(Notice::error(format!("Error durante el análisis: {}", e)));
      return;
    }
  };

  let mut writer = SaveImageFileOutput::new(output);
  let saved = writer
    .render_frame(&report.result.annotated)
    .and_then(|()| writer.save_comparison(&report.original, &report.result.annotated));
  let comparison = match saved {
    Ok(comparison) => comparison,
    Err(e) => {
      error!("无法保存结果 {}: {}", output.display(), e);
      view.notice(Notice::error(format!(
        "No se pudo guardar el resultado en '{}': {}",
        output.display(),
        e
      )));
      return;
    }
  };

  view.push(Section::Image {
    label: "Resultado Detección".to_string(),
    path: writer.path().to_path_buf(),
  });
  view.push(Section::Image {
    label: "Comparación".to_string(),
    path: comparison,
  });
  view.push(Section::heading("Métricas del Análisis"));
  view.push(metrics_section(&report.summary));
  view.notice(compliance_notice(&report.summary));
}

/// 视频页面
///
/// 调用该页面本身就是开始处理的操作：加载视频、展示预览信息后立即从
/// `Loaded` 进入 `Running`。
fn render_video(
  state: &AppState,
  input: &Path,
  output_dir: &Path,
  view: &mut ViewBuilder<'_>,
) {
  let source = match open_video(input) {
    Ok(source) => source,
    Err(e) => {
      error!("无法打开视频 {}: {}", input.display(), e);
      view.notice(Notice::error(format!(
        "No se pudo abrir el video '{}': {}",
        input.display(),
        e
      )));
      return;
    }
  };

  let mut job = VideoJob::new();
  let info = job.load(source);
  view.push(Section::Image {
    label: "Video Original".to_string(),
    path: input.to_path_buf(),
  });
  view.push(Section::text(format!(
    "Resolución {}x{}, {:.2} fps, {} cuadros",
    info.width,
    info.height,
    info.fps,
    info
      .total_frames
      .map(|n| n.to_string())
      .unwrap_or_else(|| "?".to_string())
  )));
  view.push(Section::heading("Estado del Proceso"));
  view.notice(Notice::info(
    "El video se procesará cuadro por cuadro buscando cascos de seguridad.",
  ));

  let workdir = match tempfile::tempdir() {
    Ok(workdir) => workdir,
    Err(e) => {
      view.notice(Notice::error(format!(
        "No se pudo crear el directorio temporal: {}",
        e
      )));
      return;
    }
  };
  let encoded = workdir.path().join(OUTPUT_VIDEO_FILE_NAME);
  let pipeline = state.pipeline();
  let result = job.start(
    &pipeline,
    |info| create_video_sink(&encoded, info),
    &mut ForwardProgress(view),
  );

  let outcome = match result {
    Ok(outcome) => outcome,
    Err(e) => {
      view.notice(Notice::error(format!("Error procesando el video: {}", e)));
      return;
    }
  };

  let delivered = match outcome.artifact.deliver_to(output_dir) {
    Ok(delivered) => delivered,
    Err(e) => {
      error!("无法交付视频到 {}: {}", output_dir.display(), e);
      view.notice(Notice::error(format!(
        "No se pudo guardar el video en '{}': {}",
        output_dir.display(),
        e
      )));
      return;
    }
  };
  view.notice(Notice::success("Procesamiento finalizado con éxito."));
  if outcome.preview() == PreviewStatus::PreviewUnsupported {
    view.notice(Notice::warning(
      "Formato de video no soportado por el navegador para previsualización directa.",
    ));
  }
  view.push(metrics_section(&outcome.summary));
  view.notice(compliance_notice(&outcome.summary));
  view.push(Section::Artifact {
    label: "Descargar Video Procesado".to_string(),
    file_name: outcome.artifact.file_name().to_string(),
    path: delivered,
  });
}

fn render_live(state: &AppState, source: &Url, sink: &Url, view: &mut ViewBuilder<'_>) {
  view.push(Section::text(
    "El sistema analizará la transmisión de video en vivo buscando cascos de seguridad.",
  ));
  view.push(Section::heading("Estado del Sistema"));
  view.push(Section::text("● ACTIVO"));
  view.push(Section::text("Monitoreo de Cascos"));
  view.push(Section::text("Latencia: < 100ms"));

  let session = InputWrapper::from_url(source)
    .map_err(|e| format!("No se pudo abrir la cámara '{}': {}", source, e))
    .and_then(|input| {
      OutputWrapper::from_url(sink)
        .map(|output| StreamTransport::new(input, output))
        .map_err(|e| format!("No se pudo abrir la salida '{}': {}", sink, e))
    })
    .and_then(|transport| {
      let stop = install_stop_handler().map_err(|e| e.to_string())?;
      let callback = state.pipeline().live_callback();
      transport
        .run(&callback, &stop)
        .map_err(|e| format!("La transmisión se detuvo: {}", e))
    });

  match session {
    Ok(frames) => view.notice(Notice::info(format!(
      "Monitoreo finalizado tras {} cuadros.",
      frames
    ))),
    Err(message) => {
      error!("{}", message);
      view.notice(Notice::error(message));
    }
  }
}

#[cfg(test)]
mod tests {
  use image::{DynamicImage, RgbImage};

  use super::*;
  use crate::{
    model::{HelmetClass, Model, ModelLoadError},
    task::tests::{ScriptedModel, det},
  };

  fn scripted_state(detections: Vec<crate::model::Detection>) -> AppState {
    let model: Box<dyn Model> = Box::new(ScriptedModel::new(vec![detections]));
    AppState::new(
      ModelHandle::from_result("scripted.onnx", Ok(model)),
      Annotator::default(),
    )
  }

  fn write_png(dir: &Path) -> PathBuf {
    let path = dir.join("obra.png");
    DynamicImage::ImageRgb8(RgbImage::new(80, 40))
      .save(&path)
      .unwrap();
    path
  }

  #[derive(Default)]
  struct Collect(Vec<Section>);

  impl ProgressObserver for Collect {}

  impl PageObserver for Collect {
    fn on_section(&mut self, section: &Section) {
      self.0.push(section.clone());
    }
  }

  #[test]
  fn image_page_with_one_violation_shows_alert() {
    let dir = tempfile::tempdir().unwrap();
    let state = scripted_state(vec![
      det(HelmetClass::Helmet, 0.0),
      det(HelmetClass::Helmet, 20.0),
      det(HelmetClass::NoHelmet, 40.0),
    ]);
    let page = Page::Image {
      input: write_png(dir.path()),
      output: dir.path().join("resultado.png"),
    };

    let mut collected = Collect::default();
    let view = render(&state, page, &mut collected).unwrap();

    assert_eq!(view.metric(LABEL_TOTAL), Some(3));
    assert_eq!(view.metric(LABEL_COMPLIANT), Some(2));
    assert_eq!(view.metric(LABEL_NON_COMPLIANT), Some(1));
    let alert = view.notices().last().unwrap();
    assert_eq!(alert.level, NoticeLevel::Error);
    assert!(alert.message.starts_with("ALERTA"));
    assert!(dir.path().join("resultado.png").exists());
    assert!(dir.path().join("resultado_comparacion.png").exists());
    assert_eq!(collected.0, view.sections);
  }

  #[test]
  fn image_page_without_detections_is_safe() {
    let dir = tempfile::tempdir().unwrap();
    let state = scripted_state(vec![]);
    let page = Page::Image {
      input: write_png(dir.path()),
      output: dir.path().join("resultado.png"),
    };

    let view = render(&state, page, &mut ()).unwrap();
    assert_eq!(view.metric(LABEL_TOTAL), Some(0));
    assert_eq!(view.metric(LABEL_COMPLIANT), Some(0));
    assert_eq!(view.metric(LABEL_NON_COMPLIANT), Some(0));
    assert!(!view.has_error());
    let notice = view.notices().last().unwrap();
    assert_eq!(notice.level, NoticeLevel::Success);
    assert!(notice.message.starts_with("Zona Segura"));
  }

  #[test]
  fn missing_model_shows_persistent_error() {
    let dir = tempfile::tempdir().unwrap();
    let state = AppState::new(
      ModelHandle::from_result(
        "no_existe.onnx",
        Err(ModelLoadError::NotFound("no_existe.onnx".to_string())),
      ),
      Annotator::default(),
    );

    let image = Page::Image {
      input: write_png(dir.path()),
      output: dir.path().join("resultado.png"),
    };
    let view = render(&state, image, &mut ()).unwrap();
    assert!(view.has_error());
    assert!(view.metric(LABEL_TOTAL).is_none());
    assert!(!dir.path().join("resultado.png").exists());

    let home = render(&state, Page::Home, &mut ()).unwrap();
    assert!(home.has_error());
  }

  #[test]
  fn invalid_model_path_does_not_crash() {
    let state = AppState::load(Path::new("/nonexistent/sentinel/best.onnx"), None);
    assert!(!state.model().is_ready());
    let view = render(
      &state,
      Page::Video {
        input: PathBuf::from("clip.mp4"),
        output_dir: PathBuf::from("."),
      },
      &mut (),
    )
    .unwrap();
    assert!(view.has_error());
  }

  #[test]
  fn unreadable_image_aborts_only_that_request() {
    let dir = tempfile::tempdir().unwrap();
    let state = scripted_state(vec![]);
    let broken = dir.path().join("roto.jpg");
    std::fs::write(&broken, b"not a jpeg").unwrap();

    let view = render(
      &state,
      Page::Image {
        input: broken,
        output: dir.path().join("resultado.png"),
      },
      &mut (),
    )
    .unwrap();
    assert!(view.has_error());

    let view = render(
      &state,
      Page::Image {
        input: write_png(dir.path()),
        output: dir.path().join("resultado.png"),
      },
      &mut (),
    )
    .unwrap();
    assert!(!view.has_error());
  }

  #[test]
  fn unwritable_output_becomes_an_error_notice() {
    let dir = tempfile::tempdir().unwrap();
    let blocker = dir.path().join("archivo.txt");
    std::fs::write(&blocker, b"no es un directorio").unwrap();
    let state = scripted_state(vec![det(HelmetClass::NoHelmet, 5.0)]);

    let view = render(
      &state,
      Page::Image {
        input: write_png(dir.path()),
        output: blocker.join("resultado.png"),
      },
      &mut (),
    )
    .unwrap();
    assert!(view.has_error());
    assert!(view.metric(LABEL_TOTAL).is_none());
  }

  #[test]
  fn home_page_reports_online_status() {
    let state = scripted_state(vec![]);
    let view = render(&state, Page::Home, &mut ()).unwrap();
    assert_eq!(view.title, "Inicio");
    assert!(!view.has_error());
    assert!(view.to_string().contains("Bienvenido a Sentinel"));
    let json = view.to_json();
    assert_eq!(json["page"], "Inicio");
    assert!(json["sections"].as_array().unwrap().len() > 5);
  }

  #[cfg(not(feature = "gstreamer_input"))]
  #[test]
  fn video_page_reports_missing_video_support() {
    let dir = tempfile::tempdir().unwrap();
    let clip = dir.path().join("clip.mp4");
    std::fs::write(&clip, b"").unwrap();
    let state = scripted_state(vec![]);
    let view = render(
      &state,
      Page::Video {
        input: clip,
        output_dir: dir.path().to_path_buf(),
      },
      &mut (),
    )
    .unwrap();
    assert!(view.has_error());
    assert!(!dir.path().join(OUTPUT_VIDEO_FILE_NAME).exists());
  }
}
