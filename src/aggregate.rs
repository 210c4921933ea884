// 该文件是 Sentinel （哨兵） 项目的一部分。
// src/aggregate.rs - 检测结果统计
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

use crate::model::{Detection, HelmetClass};

/// 单帧按类别划分的计数
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ClassCounts {
  pub helmet: u64,
  pub no_helmet: u64,
}

impl ClassCounts {
  pub fn total(&self) -> u64 {
    self.helmet + self.no_helmet
  }
}

/// 按类别 id 划分检测结果
pub fn count(detections: &[Detection]) -> ClassCounts {
  detections
    .iter()
    .fold(ClassCounts::default(), |mut counts, det| {
      match det.class {
        HelmetClass::Helmet => counts.helmet += 1,
        HelmetClass::NoHelmet => counts.no_helmet += 1,
      }
      counts
    })
}

/// 合规状态：存在未佩戴头盔的人员即告警
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ComplianceState {
  Safe,
  Alert { non_compliant: u64 },
}

/// 一次运行（视频或实时会话）的累计统计
///
/// 同一个人出现在多帧中时每帧都会被计数，这里不做跨帧的身份关联。
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunSummary {
  pub total_people: u64,
  pub compliant_count: u64,
  pub non_compliant_count: u64,
  pub frames: u64,
}

impl RunSummary {
  pub fn from_counts(counts: ClassCounts) -> Self {
    let mut summary = Self::default();
    summary.add_frame(counts);
    summary
  }

  pub fn add_frame(&mut self, counts: ClassCounts) {
    self.compliant_count += counts.helmet;
    self.non_compliant_count += counts.no_helmet;
    self.total_people += counts.total();
    self.frames += 1;
  }

  pub fn reset(&mut self) {
    *self = Self::default();
  }

  pub fn state(&self) -> ComplianceState {
    if self.non_compliant_count > 0 {
      ComplianceState::Alert {
        non_compliant: self.non_compliant_count,
      }
    } else {
      ComplianceState::Safe
    }
  }
}
