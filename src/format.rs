//! # 剪贴板格式标识模块
//!
//! ## 设计思路
//!
//! 用 newtype 包裹原始格式编号，集中管理已知常量与"已注册格式"区间判断，
//! 避免裸 `u32` 在探测器与后端之间乱飞。
//!
//! ## 实现思路
//!
//! - 标准格式编号与 Win32 `CF_*` 常量一致，跨平台（含内存后端）复用同一套编号。
//! - `0xC000..=0xFFFF` 是系统为 `RegisterClipboardFormat` 预留的动态区间，
//!   远程桌面类软件的私有位图格式都落在这里，探测器据此做启发式分类。

use std::fmt;

/// 剪贴板格式标识（不透明整数，按值比较）。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ClipboardFormatId(pub u32);

/// 设备相关位图句柄（HBITMAP）。
pub const CF_BITMAP: ClipboardFormatId = ClipboardFormatId(2);
/// 标准设备无关位图（BITMAPINFOHEADER + 像素）。
pub const CF_DIB: ClipboardFormatId = ClipboardFormatId(8);
/// 增强型图元文件。
pub const CF_ENHMETAFILE: ClipboardFormatId = ClipboardFormatId(14);
/// 文件拖放列表（DROPFILES + 路径表）。
pub const CF_HDROP: ClipboardFormatId = ClipboardFormatId(15);
/// 扩展设备无关位图（BITMAPV5HEADER，带显式通道掩码）。
pub const CF_DIBV5: ClipboardFormatId = ClipboardFormatId(17);

/// `RegisterClipboardFormat` 动态分配区间的下界。
pub const REGISTERED_FORMAT_MIN: u32 = 0xC000;
/// 动态分配区间的上界。
pub const REGISTERED_FORMAT_MAX: u32 = 0xFFFF;

impl ClipboardFormatId {
    /// 是否落在动态注册格式区间内。
    ///
    /// 远程桌面客户端（mstsc / Citrix 等）的私有位图格式都以此方式注册。
    pub fn is_registered(self) -> bool {
        (REGISTERED_FORMAT_MIN..=REGISTERED_FORMAT_MAX).contains(&self.0)
    }

    /// 已知标准格式的可读名称，用于日志。
    pub fn well_known_name(self) -> Option<&'static str> {
        match self {
            CF_BITMAP => Some("CF_BITMAP"),
            CF_DIB => Some("CF_DIB"),
            CF_ENHMETAFILE => Some("CF_ENHMETAFILE"),
            CF_HDROP => Some("CF_HDROP"),
            CF_DIBV5 => Some("CF_DIBV5"),
            _ => None,
        }
    }
}

impl fmt::Display for ClipboardFormatId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.well_known_name() {
            Some(name) => write!(f, "{}", name),
            None if self.is_registered() => write!(f, "registered(0x{:04X})", self.0),
            None => write!(f, "format({})", self.0),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registered_range_bounds_are_inclusive() {
        assert!(ClipboardFormatId(0xC000).is_registered());
        assert!(ClipboardFormatId(0xFFFF).is_registered());
        assert!(!ClipboardFormatId(0xBFFF).is_registered());
        assert!(!CF_DIB.is_registered());
    }

    #[test]
    fn display_shows_well_known_names() {
        assert_eq!(CF_DIBV5.to_string(), "CF_DIBV5");
        assert_eq!(ClipboardFormatId(0xC123).to_string(), "registered(0xC123)");
        assert_eq!(ClipboardFormatId(3).to_string(), "format(3)");
    }
}
