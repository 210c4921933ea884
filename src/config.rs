// 该文件是 Sentinel （哨兵） 项目的一部分。
// src/config.rs - 固定配置常量
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

/// 所有模式统一使用的置信度阈值，不对用户开放
pub const CONFIDENCE_THRESHOLD: f32 = 0.5;

/// 默认权重文件（相对于工作目录）
pub const DEFAULT_MODEL_PATH: &str = "best.onnx";

/// 处理后视频的下载文件名
pub const OUTPUT_VIDEO_FILE_NAME: &str = "video_procesado.mp4";

/// 模型输入边长（正方形）
pub const MODEL_INPUT_SIZE: u32 = 640;

/// NMS IoU 阈值
pub const NMS_IOU_THRESHOLD: f32 = 0.7;

/// 单帧最大检测数量
pub const MAX_DETECTIONS: usize = 300;

pub const IMAGE_EXTENSIONS: [&str; 3] = ["jpg", "jpeg", "png"];
pub const VIDEO_EXTENSIONS: [&str; 2] = ["mp4", "avi"];

/// 未指定字体时依次尝试的系统字体
pub const FALLBACK_FONTS: [&str; 4] = [
  "/usr/share/fonts/truetype/dejavu/DejaVuSans-Bold.ttf",
  "/usr/share/fonts/truetype/dejavu/DejaVuSans.ttf",
  "/usr/share/fonts/TTF/DejaVuSans.ttf",
  "/System/Library/Fonts/Supplemental/Arial.ttf",
];

/// 按扩展名判断是否为受支持的图片
pub fn is_image_path(path: &std::path::Path) -> bool {
  has_extension(path, &IMAGE_EXTENSIONS)
}

/// 按扩展名判断是否为受支持的视频
pub fn is_video_path(path: &std::path::Path) -> bool {
  has_extension(path, &VIDEO_EXTENSIONS)
}

fn has_extension(path: &std::path::Path, allowed: &[&str]) -> bool {
  path
    .extension()
    .and_then(|ext| ext.to_str())
    .map(|ext| allowed.iter().any(|a| a.eq_ignore_ascii_case(ext)))
    .unwrap_or(false)
}
