// 该文件是 Sentinel （哨兵） 项目的一部分。
// src/args.rs - 命令行参数
//
// 本程序遵循 GNU Affero 通用公共许可证（AGPL）许可协议。
// 本程序的发布旨在提供实用价值，但不作任何形式的担保，
// 包括但不限于对适销性或特定用途适用性的默示担保。
// 更多详情请参阅 GNU 通用公共许可证。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, ETVP

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use url::Url;

use sentinel::{config::DEFAULT_MODEL_PATH, page::Page};

/// Sentinel 头盔佩戴检测
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
  /// 模型权重文件路径（ONNX）
  #[arg(long, env = "SENTINEL_MODEL", default_value = DEFAULT_MODEL_PATH, value_name = "FILE")]
  pub model: PathBuf,

  /// 标签字体（TTF），未指定时使用系统字体
  #[arg(long, value_name = "FONT")]
  pub font: Option<PathBuf>,

  /// 以 JSON 输出页面内容
  #[arg(long, default_value_t = false)]
  pub json: bool,

  /// 页面，默认首页
  #[command(subcommand)]
  pub page: Option<PageCommand>,
}

#[derive(Subcommand, Debug)]
pub enum PageCommand {
  /// 首页
  Home,
  /// 分析一张图片（jpg、jpeg、png）
  Image {
    #[arg(value_name = "IMAGE")]
    input: PathBuf,
    /// 标注结果保存路径，对比图保存在同一目录
    #[arg(long, short, default_value = "resultado.png", value_name = "OUTPUT")]
    output: PathBuf,
  },
  /// 逐帧处理视频文件（mp4、avi）
  Video {
    #[arg(value_name = "VIDEO")]
    input: PathBuf,
    /// 成品 video_procesado.mp4 的保存目录
    #[arg(long, default_value = ".", value_name = "DIR")]
    output_dir: PathBuf,
  },
  /// 摄像头实时监控，Ctrl-C 结束
  Live {
    /// 输入来源
    #[arg(long, default_value = "gst://camera/dev/video0", value_name = "SOURCE")]
    source: Url,
    /// 画面输出（gstlive://display 或 gstlive://主机:端口）
    #[arg(long, default_value = "gstlive://display", value_name = "SINK")]
    sink: Url,
  },
}

impl From<PageCommand> for Page {
  fn from(command: PageCommand) -> Self {
    match command {
      PageCommand::Home => Page::Home,
      PageCommand::Image { input, output } => Page::Image { input, output },
      PageCommand::Video { input, output_dir } => Page::Video { input, output_dir },
      PageCommand::Live { source, sink } => Page::Live { source, sink },
    }
  }
}
