//! # 位图头解析模块
//!
//! ## 设计思路
//!
//! 剪贴板上的 DIB 数据以一段二进制头开始，生产者五花八门：截图工具多给
//! 40 字节的 BITMAPINFOHEADER，远程桌面客户端多给 124 字节的 BITMAPV5HEADER
//! （带显式通道掩码）。本模块只做"字节 → 结构化头 + 几何计算"，
//! 不触碰像素内容，全部读取走 `RawBuffer` 的边界检查访问器。
//!
//! ## 实现思路
//!
//! 1. 读前 4 字节作为声明的结构大小，按 40 / 124 分派到 Legacy / Extended。
//! 2. 位深只接受 {8, 16, 24, 32}，其余立即拒绝。
//! 3. 行跨度按 4 字节对齐：`stride = align4(width * bytes_per_pixel)`。
//! 4. 像素偏移 = 头大小 + 调色板字节数；8 位必有 256 项调色板，
//!    16 位按本模型同样预留 256 项（兼容给 16 位数据也附调色板的生产者）。
//! 5. 声明尺寸对不上实际缓冲长度的，判为截断数据拒绝。
//!
//! `height` 为负表示自上而下（top-down）存储，绝对值才是真实行数；
//! 这个标志会被解包器用来决定是否做 Y 轴翻转。

use crate::backend::RawBuffer;
use crate::error::CaptureError;

/// BITMAPINFOHEADER 的结构大小。
pub const LEGACY_HEADER_SIZE: u32 = 40;
/// BITMAPV5HEADER 的结构大小。
pub const EXTENDED_HEADER_SIZE: u32 = 124;

/// 解析后的位图头。
///
/// 不变式：`size` 字段必等于对应结构的字节大小，否则 `parse` 已拒绝。
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BitmapHeader {
    /// 标准 BITMAPINFOHEADER（40 字节）。
    Legacy {
        size: u32,
        width: i32,
        height: i32,
        planes: u16,
        bit_count: u16,
        compression: u32,
        palette_used: u32,
    },
    /// BITMAPV5HEADER（124 字节），带显式通道掩码。
    Extended {
        size: u32,
        width: i32,
        height: i32,
        planes: u16,
        bit_count: u16,
        compression: u32,
        palette_used: u32,
        red_mask: u32,
        green_mask: u32,
        blue_mask: u32,
        alpha_mask: u32,
    },
}

impl BitmapHeader {
    /// 从原始缓冲解析位图头并校验几何一致性。
    pub fn parse(buf: &RawBuffer) -> Result<Self, CaptureError> {
        let declared = buf.read_u32_le(0).ok_or(CaptureError::TruncatedBuffer {
            expected: 4,
            actual: buf.len(),
        })?;

        let header = match declared {
            LEGACY_HEADER_SIZE => Self::parse_common(buf, declared)?,
            EXTENDED_HEADER_SIZE => {
                let base = Self::parse_common(buf, declared)?;
                let Self::Legacy {
                    size,
                    width,
                    height,
                    planes,
                    bit_count,
                    compression,
                    palette_used,
                } = base
                else {
                    unreachable!("parse_common 只产出 Legacy 变体");
                };

                let mask_at = |offset: usize| {
                    buf.read_u32_le(offset).ok_or(CaptureError::TruncatedBuffer {
                        expected: EXTENDED_HEADER_SIZE as usize,
                        actual: buf.len(),
                    })
                };

                Self::Extended {
                    size,
                    width,
                    height,
                    planes,
                    bit_count,
                    compression,
                    palette_used,
                    red_mask: mask_at(40)?,
                    green_mask: mask_at(44)?,
                    blue_mask: mask_at(48)?,
                    alpha_mask: mask_at(52)?,
                }
            }
            other => {
                return Err(CaptureError::UnrecognizedHeader(format!(
                    "声明大小 {}（期望 {} 或 {}）",
                    other, LEGACY_HEADER_SIZE, EXTENDED_HEADER_SIZE
                )));
            }
        };

        header.validate_geometry(buf)?;
        Ok(header)
    }

    /// 解析两种变体共有的前 40 字节。
    fn parse_common(buf: &RawBuffer, declared: u32) -> Result<Self, CaptureError> {
        let truncated = || CaptureError::TruncatedBuffer {
            expected: declared as usize,
            actual: buf.len(),
        };

        let width = buf.read_i32_le(4).ok_or_else(truncated)?;
        let height = buf.read_i32_le(8).ok_or_else(truncated)?;
        let planes = buf.read_u16_le(12).ok_or_else(truncated)?;
        let bit_count = buf.read_u16_le(14).ok_or_else(truncated)?;
        let compression = buf.read_u32_le(16).ok_or_else(truncated)?;
        let palette_used = buf.read_u32_le(32).ok_or_else(truncated)?;

        if !matches!(bit_count, 8 | 16 | 24 | 32) {
            return Err(CaptureError::UnsupportedBitDepth(bit_count));
        }

        // 上限保证 stride 等几何计算不会溢出 u32
        const MAX_DIMENSION: i32 = 0x0FFF_FFFF;
        if width <= 0 || height == 0 || width > MAX_DIMENSION || height.unsigned_abs() > MAX_DIMENSION as u32 {
            return Err(CaptureError::UnrecognizedHeader(format!(
                "非法尺寸 {}x{}",
                width, height
            )));
        }

        Ok(Self::Legacy {
            size: declared,
            width,
            height,
            planes,
            bit_count,
            compression,
            palette_used,
        })
    }

    /// 校验"像素偏移 + 行跨度×行数"不超过实际缓冲。
    fn validate_geometry(&self, buf: &RawBuffer) -> Result<(), CaptureError> {
        let expected = (self.pixel_offset() as u64)
            .checked_add(self.stride() as u64 * self.rows() as u64)
            .and_then(|v| usize::try_from(v).ok())
            .ok_or(CaptureError::UnrecognizedHeader(
                "尺寸计算溢出".to_string(),
            ))?;

        if expected > buf.len() {
            return Err(CaptureError::TruncatedBuffer {
                expected,
                actual: buf.len(),
            });
        }
        Ok(())
    }

    pub fn header_size(&self) -> u32 {
        match self {
            Self::Legacy { size, .. } | Self::Extended { size, .. } => *size,
        }
    }

    pub fn width(&self) -> u32 {
        match self {
            Self::Legacy { width, .. } | Self::Extended { width, .. } => *width as u32,
        }
    }

    /// 真实行数（`height` 的绝对值）。
    pub fn rows(&self) -> u32 {
        match self {
            Self::Legacy { height, .. } | Self::Extended { height, .. } => {
                height.unsigned_abs()
            }
        }
    }

    /// 负 height 表示行序自上而下，解包时无需翻转。
    pub fn is_top_down(&self) -> bool {
        match self {
            Self::Legacy { height, .. } | Self::Extended { height, .. } => *height < 0,
        }
    }

    pub fn bit_count(&self) -> u16 {
        match self {
            Self::Legacy { bit_count, .. } | Self::Extended { bit_count, .. } => *bit_count,
        }
    }

    /// 每像素字节数。
    pub fn bytes_per_pixel(&self) -> u32 {
        u32::from(self.bit_count()) / 8
    }

    /// 行跨度（含 4 字节对齐填充）。
    pub fn stride(&self) -> u32 {
        align4(self.width() * self.bytes_per_pixel())
    }

    /// 调色板项数。
    ///
    /// 8 位必有 256 项；16 位按本模型同样预留 256 项，其余位深无调色板。
    pub fn palette_entries(&self) -> u32 {
        match self.bit_count() {
            8 | 16 => 256,
            _ => 0,
        }
    }

    /// 像素数据起始偏移 = 头大小 + 调色板字节数。
    pub fn pixel_offset(&self) -> u32 {
        self.header_size() + self.palette_entries() * 4
    }

    /// 显式通道掩码 `(red, green, blue, alpha)`；Legacy 头无掩码。
    pub fn color_masks(&self) -> Option<(u32, u32, u32, u32)> {
        match self {
            Self::Legacy { .. } => None,
            Self::Extended {
                red_mask,
                green_mask,
                blue_mask,
                alpha_mask,
                ..
            } => Some((*red_mask, *green_mask, *blue_mask, *alpha_mask)),
        }
    }
}

/// 向上取整到 4 字节边界。
fn align4(value: u32) -> u32 {
    value.div_ceil(4) * 4
}

#[cfg(test)]
mod tests {
    use super::*;

    /// 组装一个 Legacy 头 + 指定体积的像素区（测试共用）。
    fn legacy_buffer(width: i32, height: i32, bit_count: u16, payload_len: usize) -> RawBuffer {
        let mut bytes = vec![0u8; 40];
        bytes[0..4].copy_from_slice(&LEGACY_HEADER_SIZE.to_le_bytes());
        bytes[4..8].copy_from_slice(&width.to_le_bytes());
        bytes[8..12].copy_from_slice(&height.to_le_bytes());
        bytes[12..14].copy_from_slice(&1u16.to_le_bytes());
        bytes[14..16].copy_from_slice(&bit_count.to_le_bytes());
        bytes.resize(40 + payload_len, 0);
        RawBuffer::new(bytes)
    }

    #[test]
    fn parses_legacy_header_fields() {
        let buf = legacy_buffer(3, 2, 24, 2 * 12);
        let header = BitmapHeader::parse(&buf).expect("parse should succeed");

        assert_eq!(header.header_size(), 40);
        assert_eq!(header.width(), 3);
        assert_eq!(header.rows(), 2);
        assert!(!header.is_top_down());
        assert_eq!(header.bit_count(), 24);
        // 3 像素 × 3 字节 = 9，对齐到 12
        assert_eq!(header.stride(), 12);
        assert_eq!(header.pixel_offset(), 40);
        assert!(header.color_masks().is_none());
    }

    #[test]
    fn parses_extended_header_with_masks() {
        let mut bytes = vec![0u8; 124];
        bytes[0..4].copy_from_slice(&EXTENDED_HEADER_SIZE.to_le_bytes());
        bytes[4..8].copy_from_slice(&2i32.to_le_bytes());
        bytes[8..12].copy_from_slice(&(-2i32).to_le_bytes());
        bytes[12..14].copy_from_slice(&1u16.to_le_bytes());
        bytes[14..16].copy_from_slice(&32u16.to_le_bytes());
        bytes[40..44].copy_from_slice(&0x00FF_0000u32.to_le_bytes());
        bytes[44..48].copy_from_slice(&0x0000_FF00u32.to_le_bytes());
        bytes[48..52].copy_from_slice(&0x0000_00FFu32.to_le_bytes());
        bytes[52..56].copy_from_slice(&0xFF00_0000u32.to_le_bytes());
        bytes.resize(124 + 2 * 8, 0);

        let header = BitmapHeader::parse(&RawBuffer::new(bytes)).expect("parse should succeed");

        assert!(header.is_top_down());
        assert_eq!(header.rows(), 2);
        assert_eq!(
            header.color_masks(),
            Some((0x00FF_0000, 0x0000_FF00, 0x0000_00FF, 0xFF00_0000))
        );
    }

    #[test]
    fn rejects_unknown_declared_size() {
        let mut bytes = vec![0u8; 64];
        bytes[0..4].copy_from_slice(&108u32.to_le_bytes());

        assert!(matches!(
            BitmapHeader::parse(&RawBuffer::new(bytes)),
            Err(CaptureError::UnrecognizedHeader(_))
        ));
    }

    #[test]
    fn rejects_unsupported_bit_depth() {
        let buf = legacy_buffer(4, 4, 4, 64);
        assert!(matches!(
            BitmapHeader::parse(&buf),
            Err(CaptureError::UnsupportedBitDepth(4))
        ));
    }

    #[test]
    fn rejects_truncated_pixel_data() {
        // 4x4 @ 32bpp 需要 64 字节像素，只给 10
        let buf = legacy_buffer(4, 4, 32, 10);
        assert!(matches!(
            BitmapHeader::parse(&buf),
            Err(CaptureError::TruncatedBuffer { .. })
        ));
    }

    #[test]
    fn rejects_tiny_buffer_without_panicking() {
        assert!(matches!(
            BitmapHeader::parse(&RawBuffer::new(vec![0x28])),
            Err(CaptureError::TruncatedBuffer { .. })
        ));
        assert!(matches!(
            BitmapHeader::parse(&RawBuffer::new(Vec::new())),
            Err(CaptureError::TruncatedBuffer { .. })
        ));
    }

    #[test]
    fn eight_bit_reserves_full_palette() {
        // 2x2 @ 8bpp：调色板 1024 字节，行跨度 4
        let buf = legacy_buffer(2, 2, 8, 1024 + 8);
        let header = BitmapHeader::parse(&buf).expect("parse should succeed");

        assert_eq!(header.palette_entries(), 256);
        assert_eq!(header.pixel_offset(), 40 + 1024);
        assert_eq!(header.stride(), 4);
    }

    #[test]
    fn sixteen_bit_also_reserves_palette() {
        let buf = legacy_buffer(2, 1, 16, 1024 + 4);
        let header = BitmapHeader::parse(&buf).expect("parse should succeed");

        assert_eq!(header.palette_entries(), 256);
        assert_eq!(header.pixel_offset(), 40 + 1024);
    }

    #[test]
    fn negative_height_means_top_down() {
        let buf = legacy_buffer(2, -3, 32, 3 * 8);
        let header = BitmapHeader::parse(&buf).expect("parse should succeed");

        assert!(header.is_top_down());
        assert_eq!(header.rows(), 3);
    }
}
