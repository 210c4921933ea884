// 该文件是 Sentinel （哨兵） 项目的一部分。
// src/model/loader.rs - 模型加载与进程级缓存
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
  collections::HashMap,
  path::{Path, PathBuf},
  sync::{Arc, Mutex, OnceLock},
};

use thiserror::Error;
use tracing::{error, info};

use crate::{
  frame::Frame,
  model::{Detection, InferError, Model},
};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ModelLoadError {
  #[error("模型文件不存在: {0}")]
  NotFound(String),
  #[error("模型文件读取失败: {0}")]
  Io(String),
  #[error("模型无效: {0}")]
  Invalid(String),
  #[error("未启用任何推理后端")]
  NoBackend,
}

/// 已加载（或加载失败）的模型句柄
///
/// 句柄可以廉价克隆并在页面、帧与线程间只读共享。加载失败时句柄仍然存在，
/// 对它推理只会返回 [`InferError::ModelUnavailable`]。
#[derive(Clone)]
pub struct ModelHandle {
  path: PathBuf,
  inner: Arc<Result<Box<dyn Model>, ModelLoadError>>,
}

impl std::fmt::Debug for ModelHandle {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("ModelHandle")
      .field("path", &self.path)
      .field("ready", &self.is_ready())
      .finish()
  }
}

impl ModelHandle {
  pub fn from_result(path: impl Into<PathBuf>, result: Result<Box<dyn Model>, ModelLoadError>) -> Self {
    Self {
      path: path.into(),
      inner: Arc::new(result),
    }
  }

  pub fn path(&self) -> &Path {
    &self.path
  }

  pub fn is_ready(&self) -> bool {
    self.inner.is_ok()
  }

  pub fn error(&self) -> Option<&ModelLoadError> {
    (*self.inner).as_ref().err()
  }

  pub fn model(&self) -> Result<&dyn Model, &ModelLoadError> {
    match &*self.inner {
      Ok(model) => Ok(&**model),
      Err(e) => Err(e),
    }
  }

  pub fn infer(&self, frame: &Frame, confidence_threshold: f32) -> Result<Vec<Detection>, InferError> {
    match &*self.inner {
      Ok(model) => model.infer(frame, confidence_threshold),
      Err(e) => Err(InferError::ModelUnavailable(e.to_string())),
    }
  }
}

/// 以路径为键缓存模型句柄
///
/// 整个查找与加载过程持有同一把锁，因此同一路径的加载函数在注册表生命周期内
/// 最多执行一次，失败结果同样被缓存。
#[derive(Default)]
pub struct ModelRegistry {
  handles: Mutex<HashMap<PathBuf, ModelHandle>>,
}

impl ModelRegistry {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn get_or_load<F>(&self, path: &Path, loader: F) -> ModelHandle
  where
    F: FnOnce(&Path) -> Result<Box<dyn Model>, ModelLoadError>,
  {
    // `best.onnx` 与 `./best.onnx` 共用一项
    let key = std::path::absolute(path).unwrap_or_else(|_| path.to_path_buf());
    let mut handles = self.handles.lock().unwrap_or_else(|e| e.into_inner());
    if let Some(handle) = handles.get(&key) {
      return handle.clone();
    }

    info!("加载模型文件: {}", path.display());
    let result = loader(path);
    match &result {
      Ok(model) => info!("模型加载完成: {} ({})", path.display(), model.name()),
      Err(e) => error!("模型加载失败: {}", e),
    }

    let handle = ModelHandle::from_result(path, result);
    handles.insert(key, handle.clone());
    handle
  }

  pub fn len(&self) -> usize {
    self.handles.lock().map(|h| h.len()).unwrap_or(0)
  }

  pub fn is_empty(&self) -> bool {
    self.len() == 0
  }
}

fn global_registry() -> &'static ModelRegistry {
  static REGISTRY: OnceLock<ModelRegistry> = OnceLock::new();
  REGISTRY.get_or_init(ModelRegistry::new)
}

/// 通过进程级注册表加载模型，同一路径只加载一次
pub fn load(path: impl AsRef<Path>) -> ModelHandle {
  global_registry().get_or_load(path.as_ref(), default_loader)
}

#[cfg(feature = "backend_tract")]
fn default_loader(path: &Path) -> Result<Box<dyn Model>, ModelLoadError> {
  let model = crate::model::YoloV8Builder::new(path).build()?;
  Ok(Box::new(model))
}

#[cfg(not(feature = "backend_tract"))]
fn default_loader(_path: &Path) -> Result<Box<dyn Model>, ModelLoadError> {
  Err(ModelLoadError::NoBackend)
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::model::HelmetClass;
  use std::sync::atomic::{AtomicUsize, Ordering};

  struct FixedModel;

  impl Model for FixedModel {
    fn name(&self) -> &'static str {
      "fixed"
    }

    fn infer(&self, _frame: &Frame, _threshold: f32) -> Result<Vec<Detection>, InferError> {
      Ok(vec![Detection {
        class: HelmetClass::Helmet,
        confidence: 0.9,
        bbox: [0.0, 0.0, 1.0, 1.0],
      }])
    }
  }

  #[test]
  fn loader_runs_once_per_path() {
    let registry = ModelRegistry::new();
    let calls = AtomicUsize::new(0);
    let loader = |_: &Path| -> Result<Box<dyn Model>, ModelLoadError> {
      calls.fetch_add(1, Ordering::SeqCst);
      Ok(Box::new(FixedModel))
    };

    let a = registry.get_or_load(Path::new("a.onnx"), loader);
    let b = registry.get_or_load(Path::new("a.onnx"), loader);
    let _c = registry.get_or_load(Path::new("c.onnx"), loader);

    assert_eq!(calls.load(Ordering::SeqCst), 2);
    assert!(Arc::ptr_eq(&a.inner, &b.inner));
    assert_eq!(registry.len(), 2);
  }

  #[test]
  fn relative_spellings_share_one_load() {
    let registry = ModelRegistry::new();
    let calls = AtomicUsize::new(0);
    let loader = |_: &Path| -> Result<Box<dyn Model>, ModelLoadError> {
      calls.fetch_add(1, Ordering::SeqCst);
      Ok(Box::new(FixedModel))
    };

    let a = registry.get_or_load(Path::new("best.onnx"), loader);
    let b = registry.get_or_load(Path::new("./best.onnx"), loader);
    let cwd = std::env::current_dir().unwrap();
    let c = registry.get_or_load(&cwd.join("best.onnx"), loader);

    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert!(Arc::ptr_eq(&a.inner, &b.inner));
    assert!(Arc::ptr_eq(&a.inner, &c.inner));
    assert_eq!(registry.len(), 1);
  }

  #[test]
  fn failed_load_is_cached_and_inference_reports_it() {
    let registry = ModelRegistry::new();
    let calls = AtomicUsize::new(0);
    let loader = |p: &Path| -> Result<Box<dyn Model>, ModelLoadError> {
      calls.fetch_add(1, Ordering::SeqCst);
      Err(ModelLoadError::NotFound(p.display().to_string()))
    };

    let handle = registry.get_or_load(Path::new("missing.onnx"), loader);
    let again = registry.get_or_load(Path::new("missing.onnx"), loader);
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert!(!handle.is_ready());
    assert_eq!(again.error(), handle.error());

    let frame = Frame::filled(4, 4, [0, 0, 0]);
    let err = handle.infer(&frame, 0.5).unwrap_err();
    assert!(matches!(err, InferError::ModelUnavailable(_)));
  }

  #[test]
  fn global_load_with_invalid_path_does_not_panic() {
    let handle = load("/nonexistent/sentinel/best.onnx");
    assert!(!handle.is_ready());
    let frame = Frame::filled(8, 8, [0, 0, 0]);
    assert!(handle.infer(&frame, 0.5).is_err());
  }

  #[test]
  fn ready_handle_delegates_to_model() {
    let handle = ModelHandle::from_result("fixed", Ok(Box::new(FixedModel)));
    let frame = Frame::filled(2, 2, [0, 0, 0]);
    assert_eq!(handle.infer(&frame, 0.5).unwrap().len(), 1);
    assert_eq!(handle.model().map(|m| m.name()).ok(), Some("fixed"));
  }
}
