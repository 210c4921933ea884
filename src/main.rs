// 该文件是 Sentinel （哨兵） 项目的一部分。
// src/main.rs - 项目主程序
//
// 本程序遵循 GNU Affero 通用公共许可证（AGPL）许可协议。
// 本程序的发布旨在提供实用价值，但不作任何形式的担保，
// 包括但不限于对适销性或特定用途适用性的默示担保。
// 更多详情请参阅 GNU 通用公共许可证。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, ETVP

mod args;

use anyhow::Result;
use clap::Parser;
use indicatif::{ProgressBar, ProgressStyle};
use tracing::info;

use sentinel::{
  page::{self, AppState, Page, PageObserver, Section},
  task::{FrameResult, Progress, ProgressObserver, VideoPhase},
};

/// 终端输出：逐段打印页面，视频运行时显示进度条
struct Console {
  json: bool,
  bar: Option<ProgressBar>,
}

impl Console {
  fn new(json: bool) -> Self {
    Self { json, bar: None }
  }
}

impl ProgressObserver for Console {
  fn on_phase(&mut self, phase: VideoPhase) {
    match phase {
      VideoPhase::Running => {
        let bar = ProgressBar::new(0);
        bar.set_style(
          ProgressStyle::with_template("{spinner} [{bar:40}] {pos}/{len} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_bar()),
        );
        self.bar = Some(bar);
      }
      _ => {
        if let Some(bar) = self.bar.take() {
          bar.abandon();
        }
      }
    }
  }

  fn on_frame(&mut self, progress: Progress, result: &FrameResult) {
    if let Some(bar) = &self.bar {
      bar.set_length(progress.total.unwrap_or(progress.current).max(progress.current));
      bar.set_position(progress.current);
      let counts = result.counts();
      bar.set_message(format!(
        "Procesando frame {} (con casco {}, sin casco {})",
        progress.current, counts.helmet, counts.no_helmet
      ));
    }
  }

  fn on_finished(&mut self, progress: Progress) {
    if let Some(bar) = self.bar.take() {
      bar.set_length(progress.current);
      bar.set_position(progress.current);
      bar.finish_with_message(format!("{:.0}%", progress.fraction() * 100.0));
    }
  }
}

impl PageObserver for Console {
  fn on_section(&mut self, section: &Section) {
    if self.json {
      return;
    }
    match &self.bar {
      Some(bar) => bar.println(section.to_string()),
      None => println!("{}", section),
    }
  }
}

fn main() -> Result<()> {
  tracing_subscriber::fmt::init();

  let args = args::Args::parse();

  info!("模型文件路径: {}", args.model.display());
  let state = AppState::load(&args.model, args.font.as_deref());

  let page: Page = args.page.map(Page::from).unwrap_or(Page::Home);
  if !args.json {
    println!("## {}", page.title());
  }

  let mut console = Console::new(args.json);
  let view = page::render(&state, page, &mut console)?;

  if args.json {
    println!("{}", serde_json::to_string_pretty(&view.to_json())?);
  }

  Ok(())
}
