//! # 文件拖放回退模块
//!
//! ## 设计思路
//!
//! 资源管理器"复制文件"走的不是位图格式，而是 CF_HDROP：一段 DROPFILES
//! 头 + 以 NUL 分隔的路径表。当剪贴板上没有任何内联像素格式时，从路径表
//! 里找图片文件直接读字节，是比启发式扫描更可靠的回退手段。
//!
//! ## 实现思路
//!
//! - DROPFILES 头固定 20 字节：偏移 0 处 u32 指向路径表起点，偏移 16 处
//!   u32 标志路径表是宽字符（UTF-16）还是窄字符。
//! - 路径表按 NUL 切分；两种编码分支统一采用"首个空条目即终止"规则
//!   （列表以双 NUL 收尾，切分后表现为一个尾部空串）。
//! - 按扩展名过滤出图片条目，依次尝试读取：单个文件读不出来只记一条
//!   警告日志换下一个，全部失败才把错误交还探测器。
//! - 读到的字节先过 `infer` 签名校验，防止改了扩展名的非图片文件混入。

use std::ffi::OsStr;
use std::path::Path;

use crate::backend::RawBuffer;
use crate::config::CaptureConfig;
use crate::error::CaptureError;

/// DROPFILES 头的固定大小。
const DROPFILES_HEADER_SIZE: usize = 20;
/// 宽字符标志在头内的偏移。
const WIDE_FLAG_OFFSET: usize = 16;

/// 从拖放负载解析出的有序绝对路径列表。
///
/// 编码（窄/宽字符）是源负载的属性，解析完成后列表本身只是字符串。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DroppedFileList {
    pub paths: Vec<String>,
}

/// 解析 DROPFILES 负载为路径列表。
pub fn parse_file_list(raw: &RawBuffer) -> Result<DroppedFileList, CaptureError> {
    let offset = raw
        .read_u32_le(0)
        .ok_or(CaptureError::TruncatedBuffer {
            expected: DROPFILES_HEADER_SIZE,
            actual: raw.len(),
        })? as usize;
    let wide = raw
        .read_u32_le(WIDE_FLAG_OFFSET)
        .ok_or(CaptureError::TruncatedBuffer {
            expected: DROPFILES_HEADER_SIZE,
            actual: raw.len(),
        })?
        != 0;

    if offset < DROPFILES_HEADER_SIZE {
        return Err(CaptureError::UnrecognizedHeader(format!(
            "DROPFILES 路径表偏移异常：{}",
            offset
        )));
    }

    let table = raw.tail(offset).ok_or(CaptureError::TruncatedBuffer {
        expected: offset,
        actual: raw.len(),
    })?;

    let paths = if wide {
        split_wide_entries(table)
    } else {
        split_ansi_entries(table)
    };

    Ok(DroppedFileList { paths })
}

/// 宽字符（UTF-16LE）分支：按 NUL 码元切分，首个空条目终止。
fn split_wide_entries(table: &[u8]) -> Vec<String> {
    let mut paths = Vec::new();
    let mut current: Vec<u16> = Vec::new();

    for unit in table.chunks_exact(2).map(|c| u16::from_le_bytes([c[0], c[1]])) {
        if unit != 0 {
            current.push(unit);
            continue;
        }
        if current.is_empty() {
            break;
        }
        paths.push(String::from_utf16_lossy(&current));
        current.clear();
    }

    // 缺失结尾 NUL 的残缺条目也收下，宁多勿漏
    if !current.is_empty() {
        paths.push(String::from_utf16_lossy(&current));
    }
    paths
}

/// 窄字符分支：同样的"首个空条目终止"规则。
fn split_ansi_entries(table: &[u8]) -> Vec<String> {
    let mut paths = Vec::new();
    let mut current: Vec<u8> = Vec::new();

    for &byte in table {
        if byte != 0 {
            current.push(byte);
            continue;
        }
        if current.is_empty() {
            break;
        }
        paths.push(String::from_utf8_lossy(&current).into_owned());
        current.clear();
    }

    if !current.is_empty() {
        paths.push(String::from_utf8_lossy(&current).into_owned());
    }
    paths
}

/// 路径扩展名是否在配置的图片扩展名集合里。
fn is_image_path(path: &str, config: &CaptureConfig) -> bool {
    Path::new(path)
        .extension()
        .and_then(OsStr::to_str)
        .map(|ext| {
            config
                .image_extensions
                .iter()
                .any(|known| known.eq_ignore_ascii_case(ext))
        })
        .unwrap_or(false)
}

/// 从拖放负载中提取第一份可读的图片文件字节。
///
/// 错误语义：
/// - 列表里没有图片扩展名的条目 → `NoImageFileInDrop`
/// - 有图片条目但全部读取失败 → 最后一次 `FileUnreadable`
pub fn extract_image(raw: &RawBuffer, config: &CaptureConfig) -> Result<Vec<u8>, CaptureError> {
    let list = parse_file_list(raw)?;
    log::debug!("📁 拖放列表包含 {} 个条目", list.paths.len());

    let mut last_error: Option<CaptureError> = None;
    let mut matched_any = false;

    for path in &list.paths {
        if !is_image_path(path, config) {
            continue;
        }
        matched_any = true;

        match std::fs::read(path) {
            Ok(bytes) => {
                if !looks_like_image(&bytes) {
                    log::warn!("⚠️ 文件签名不是图片，跳过：{}", path);
                    last_error = Some(CaptureError::Decode(format!(
                        "文件签名不是图片：{}",
                        path
                    )));
                    continue;
                }
                log::info!("📁 从拖放文件读取图片：{}（{} 字节）", path, bytes.len());
                return Ok(bytes);
            }
            Err(err) => {
                log::warn!("⚠️ 拖放文件读取失败，尝试下一个：{}（{}）", path, err);
                last_error = Some(CaptureError::FileUnreadable {
                    path: path.clone(),
                    source: err,
                });
            }
        }
    }

    if !matched_any {
        return Err(CaptureError::NoImageFileInDrop);
    }
    Err(last_error.unwrap_or(CaptureError::NoImageFileInDrop))
}

/// 用 magic bytes 判断字节内容是否为图片。
fn looks_like_image(bytes: &[u8]) -> bool {
    infer::get(bytes)
        .map(|kind| kind.matcher_type() == infer::MatcherType::Image)
        .unwrap_or(false)
}
