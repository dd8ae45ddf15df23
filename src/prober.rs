//! # 格式探测模块
//!
//! ## 设计思路
//!
//! 剪贴板所有者千差万别：截图工具给 CF_DIB，远程桌面客户端给 CF_DIBV5
//! 或私有注册格式，资源管理器只给 CF_HDROP，浏览器可能只给注册的
//! "PNG" 格式。把"下一个试谁"建模为有序的 `(格式, 解码策略)` 候选表，
//! 回退级联就成了可单测的数据而不是嵌套分支。
//!
//! ## 实现思路
//!
//! 候选排序固定为：
//! 1. 已知图片格式优先表（CF_DIBV5 → CF_DIB → CF_BITMAP → CF_ENHMETAFILE）
//! 2. 文件拖放格式（CF_HDROP）
//! 3. 远程桌面类软件动态注册的知名格式名（运行时按名称解析编号）
//! 4. 注册区间（0xC000..=0xFFFF）内的其余格式
//! 5. 启发式兜底：剩余所有体积 ≥ 1 KiB 的格式，逐个嗅探尝试
//!
//! 单个候选解码失败只淘汰该候选；资源获取类错误立即上抛。

use crate::backend::{ClipboardSession, RawBuffer};
use crate::config::CaptureConfig;
use crate::error::CaptureError;
use crate::filedrop;
use crate::format::{
    CF_BITMAP, CF_DIB, CF_DIBV5, CF_ENHMETAFILE, CF_HDROP, ClipboardFormatId,
};
use crate::unpack::{self, PixelBuffer};

/// 单个候选格式的解码策略。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecodeStrategy {
    /// 按 DIB（头 + 像素）解码。
    Dib,
    /// 按已编码图片字节（PNG/JPEG 等）解码。
    Encoded,
    /// 按文件拖放列表回退读取。
    FileDrop,
    /// 先嗅探签名：像已编码图片就走 `Encoded`，否则按 `Dib` 尝试。
    Sniff,
}

/// 一个待尝试的解码候选。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Candidate {
    pub format: ClipboardFormatId,
    pub strategy: DecodeStrategy,
}

/// 回退级联的阶段状态。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeState {
    /// 枚举格式、构建候选表。
    Probing,
    /// 按候选表逐个尝试内联格式。
    Decoding,
    /// 尝试文件拖放回退。
    FallbackFileList,
    /// 体积启发式兜底扫描。
    HeuristicScan,
    /// 所有候选耗尽。
    Exhausted,
}

/// 已知图片格式优先表（顺序即优先级）。
const PRIORITY_FORMATS: [ClipboardFormatId; 4] = [CF_DIBV5, CF_DIB, CF_BITMAP, CF_ENHMETAFILE];

/// 远程桌面/浏览器常见的动态注册格式名及其解码策略。
///
/// 编号是运行期 `RegisterClipboardFormat` 分配的，只能按名称解析。
const VENDOR_FORMAT_NAMES: [(&str, DecodeStrategy); 5] = [
    ("PNG", DecodeStrategy::Encoded),
    ("image/png", DecodeStrategy::Encoded),
    ("JFIF", DecodeStrategy::Encoded),
    ("image/jpeg", DecodeStrategy::Encoded),
    ("DeviceIndependentBitmap", DecodeStrategy::Dib),
];

/// 纯函数版候选选择：给定当前格式集合，返回第一个应尝试的格式。
///
/// 结果必须是确定性的：同一集合永远返回同一答案。
/// （动态注册名的解析需要会话，不在本函数覆盖范围内。）
pub fn select_candidate(formats: &[ClipboardFormatId]) -> Option<ClipboardFormatId> {
    for preferred in PRIORITY_FORMATS {
        if formats.contains(&preferred) {
            return Some(preferred);
        }
    }

    if formats.contains(&CF_HDROP) {
        return Some(CF_HDROP);
    }

    formats
        .iter()
        .copied()
        .filter(|f| f.is_registered())
        .min_by_key(|f| f.0)
}

/// 构建内联候选表（阶段 1~4，不含启发式兜底）。
pub fn plan_candidates(
    session: &mut dyn ClipboardSession,
    formats: &[ClipboardFormatId],
) -> Vec<Candidate> {
    let mut plan = Vec::new();

    for preferred in PRIORITY_FORMATS {
        if formats.contains(&preferred) {
            plan.push(Candidate {
                format: preferred,
                strategy: DecodeStrategy::Dib,
            });
        }
    }

    if formats.contains(&CF_HDROP) {
        plan.push(Candidate {
            format: CF_HDROP,
            strategy: DecodeStrategy::FileDrop,
        });
    }

    for (name, strategy) in VENDOR_FORMAT_NAMES {
        if let Some(id) = session.resolve_format_name(name) {
            if formats.contains(&id) && !plan.iter().any(|c| c.format == id) {
                log::debug!("🔍 命中注册格式 \"{}\" -> {}", name, id);
                plan.push(Candidate {
                    format: id,
                    strategy,
                });
            }
        }
    }

    let mut registered: Vec<ClipboardFormatId> = formats
        .iter()
        .copied()
        .filter(|f| f.is_registered() && !plan.iter().any(|c| c.format == *f))
        .collect();
    registered.sort();
    plan.extend(registered.into_iter().map(|format| Candidate {
        format,
        strategy: DecodeStrategy::Sniff,
    }));

    plan
}

/// 启发式兜底：还没试过、且体积 ≥ 阈值的所有格式。
pub fn heuristic_candidates(
    session: &mut dyn ClipboardSession,
    formats: &[ClipboardFormatId],
    already_tried: &[ClipboardFormatId],
    config: &CaptureConfig,
) -> Vec<Candidate> {
    formats
        .iter()
        .copied()
        .filter(|f| !already_tried.contains(f))
        .filter(|f| {
            session
                .format_size(*f)
                .map(|size| size >= config.min_heuristic_bytes)
                .unwrap_or(false)
        })
        .map(|format| Candidate {
            format,
            strategy: DecodeStrategy::Sniff,
        })
        .collect()
}

/// 读取并解码单个候选。
///
/// 返回的错误可能是候选局部错误（调用方换下一个）或会话级错误（上抛）。
pub fn decode_candidate(
    session: &mut dyn ClipboardSession,
    candidate: Candidate,
    config: &CaptureConfig,
) -> Result<PixelBuffer, CaptureError> {
    if let Some(size) = session.format_size(candidate.format) {
        if size > config.max_format_bytes {
            return Err(CaptureError::Decode(format!(
                "格式 {} 体积 {} 超出上限 {}",
                candidate.format, size, config.max_format_bytes
            )));
        }
    }

    let raw = session.read_format(candidate.format)?;

    let image = match candidate.strategy {
        DecodeStrategy::Dib => unpack::decode_dib(&raw)?,
        DecodeStrategy::Encoded => decode_encoded(&raw)?,
        DecodeStrategy::FileDrop => {
            let bytes = filedrop::extract_image(&raw, config)?;
            decode_encoded(&RawBuffer::new(bytes))?
        }
        DecodeStrategy::Sniff => {
            if looks_like_encoded_image(raw.as_slice()) {
                decode_encoded(&raw)?
            } else {
                unpack::decode_dib(&raw)?
            }
        }
    };

    let pixels = u64::from(image.width) * u64::from(image.height);
    if pixels > config.max_decoded_pixels {
        return Err(CaptureError::Decode(format!(
            "解码结果 {}x{} 超出像素上限 {}",
            image.width, image.height, config.max_decoded_pixels
        )));
    }

    Ok(image)
}

/// 把已编码图片字节（PNG/JPEG/BMP…）解码到规范 RGBA。
fn decode_encoded(raw: &RawBuffer) -> Result<PixelBuffer, CaptureError> {
    if !looks_like_encoded_image(raw.as_slice()) {
        return Err(CaptureError::Decode(
            "字节签名不是已编码图片".to_string(),
        ));
    }

    let decoded = image::load_from_memory(raw.as_slice())
        .map_err(|e| CaptureError::Decode(e.to_string()))?
        .to_rgba8();
    let (width, height) = decoded.dimensions();
    PixelBuffer::new(width, height, decoded.into_raw())
}

fn looks_like_encoded_image(bytes: &[u8]) -> bool {
    infer::get(bytes)
        .map(|kind| kind.matcher_type() == infer::MatcherType::Image)
        .unwrap_or(false)
}
