//! # 像素解包模块
//!
//! ## 设计思路
//!
//! 所有解码路径最终汇聚到同一个规范表示：自上而下行序、直通（非预乘）
//! alpha 的 RGBA 缓冲。按位深与掩码有无分派出五条解包路径，每条路径
//! 都内建 Y 轴翻转 —— DIB 默认按自下而上存行，漏掉翻转是静默的正确性
//! 缺陷而非外观问题。
//!
//! ## 实现思路
//!
//! - 32 位无掩码：逐 4 字节按 B,G,R,A 读出，alpha 原样透传。
//! - 32/16 位带掩码：移位量取掩码尾部零位数；窄于 8 位的通道左移补齐
//!   到 8 位值域，宽于 8 位的取高 8 位；无 alpha 掩码时 alpha 置 255。
//!   非连续掩码按损坏头拒绝。
//! - 24 位：B,G,R 三字节，alpha 置 255。
//! - 16 位无掩码：按 5-6-5 压缩 RGB 解读。
//! - 8 位：字节为调色板索引，查 4 字节 BGR(X) 表项；越界索引不 panic、
//!   不越界读，按透明黑输出。

use crate::backend::RawBuffer;
use crate::error::CaptureError;
use crate::header::BitmapHeader;

/// 规范像素缓冲：自上而下行序、直通 alpha 的 RGBA。
///
/// 不变式：`rgba.len() == width * height * 4`。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PixelBuffer {
    pub width: u32,
    pub height: u32,
    pub rgba: Vec<u8>,
}

impl PixelBuffer {
    /// 构造并校验长度不变式。
    pub fn new(width: u32, height: u32, rgba: Vec<u8>) -> Result<Self, CaptureError> {
        let expected = (width as usize)
            .checked_mul(height as usize)
            .and_then(|pixels| pixels.checked_mul(4))
            .ok_or_else(|| CaptureError::Decode("像素总量溢出".to_string()))?;

        if rgba.len() != expected {
            return Err(CaptureError::Decode(format!(
                "RGBA 长度异常：期望 {} 实际 {}",
                expected,
                rgba.len()
            )));
        }

        Ok(Self {
            width,
            height,
            rgba,
        })
    }

    /// 取 `(x, y)` 处的 RGBA 值（测试与诊断用）。
    pub fn pixel(&self, x: u32, y: u32) -> Option<[u8; 4]> {
        if x >= self.width || y >= self.height {
            return None;
        }
        let idx = (y as usize * self.width as usize + x as usize) * 4;
        self.rgba
            .get(idx..idx + 4)
            .map(|p| [p[0], p[1], p[2], p[3]])
    }
}

/// 解析 + 解包一整段剪贴板 DIB 数据。
pub fn decode_dib(buf: &RawBuffer) -> Result<PixelBuffer, CaptureError> {
    let header = BitmapHeader::parse(buf)?;

    let palette_len = header.palette_entries() as usize * 4;
    let palette = if palette_len > 0 {
        Some(
            buf.slice(header.header_size() as usize, palette_len)
                .ok_or(CaptureError::TruncatedBuffer {
                    expected: header.pixel_offset() as usize,
                    actual: buf.len(),
                })?,
        )
    } else {
        None
    };

    let pixel_len = header.stride() as usize * header.rows() as usize;
    let pixels = buf
        .slice(header.pixel_offset() as usize, pixel_len)
        .ok_or(CaptureError::TruncatedBuffer {
            expected: header.pixel_offset() as usize + pixel_len,
            actual: buf.len(),
        })?;

    unpack(&header, pixels, palette)
}

/// 按位深分派，把原始像素字节解包为规范 RGBA。
pub fn unpack(
    header: &BitmapHeader,
    pixels: &[u8],
    palette: Option<&[u8]>,
) -> Result<PixelBuffer, CaptureError> {
    let width = header.width() as usize;
    let rows = header.rows() as usize;
    let stride = header.stride() as usize;

    let needed = stride
        .checked_mul(rows)
        .ok_or_else(|| CaptureError::Decode("像素区长度溢出".to_string()))?;
    if pixels.len() < needed {
        return Err(CaptureError::TruncatedBuffer {
            expected: needed,
            actual: pixels.len(),
        });
    }

    let masks = effective_masks(header)?;

    let mut rgba = vec![0u8; width * rows * 4];
    for y in 0..rows {
        // 默认自下而上存储：目标第 y 行来自源第 rows-1-y 行
        let src_row = if header.is_top_down() { y } else { rows - 1 - y };
        let row = &pixels[src_row * stride..src_row * stride + stride];
        let out = &mut rgba[y * width * 4..(y + 1) * width * 4];

        match (header.bit_count(), &masks) {
            (32, Some(ch)) => unpack_masked_row(row, out, 4, ch),
            (16, Some(ch)) => unpack_masked_row(row, out, 2, ch),
            (32, None) => unpack_bgra_row(row, out),
            (24, None) => unpack_bgr_row(row, out),
            (16, None) => unpack_rgb565_row(row, out),
            (8, _) => unpack_palette_row(row, out, palette.unwrap_or(&[])),
            (depth, _) => return Err(CaptureError::UnsupportedBitDepth(depth)),
        }
    }

    PixelBuffer::new(header.width(), header.rows(), rgba)
}

// ============================================================================
// 掩码通道
// ============================================================================

/// 单个通道的掩码、移位量与有效位宽。
struct MaskChannel {
    mask: u32,
    shift: u32,
    width: u32,
}

/// 三个颜色通道 + 可选 alpha 通道。
struct ChannelMasks {
    red: MaskChannel,
    green: MaskChannel,
    blue: MaskChannel,
    alpha: Option<MaskChannel>,
}

/// 头里带非零 RGB 掩码时走掩码路径，否则按位深默认布局。
fn effective_masks(header: &BitmapHeader) -> Result<Option<ChannelMasks>, CaptureError> {
    let Some((red, green, blue, alpha)) = header.color_masks() else {
        return Ok(None);
    };
    if red == 0 && green == 0 && blue == 0 {
        return Ok(None);
    }

    let channel = |name: &str, mask: u32| -> Result<MaskChannel, CaptureError> {
        let shift = mask.trailing_zeros();
        let shifted = mask >> shift;
        if mask == 0 || (shifted & (shifted + 1)) != 0 {
            return Err(CaptureError::UnrecognizedHeader(format!(
                "{} 通道掩码非连续：0x{:08X}",
                name, mask
            )));
        }
        Ok(MaskChannel {
            mask,
            shift,
            width: shifted.count_ones(),
        })
    };

    let alpha = if alpha == 0 {
        None
    } else {
        Some(channel("alpha", alpha)?)
    };

    Ok(Some(ChannelMasks {
        red: channel("red", red)?,
        green: channel("green", green)?,
        blue: channel("blue", blue)?,
        alpha,
    }))
}

/// 按掩码取通道值并归一到 8 位值域。
fn extract_channel(word: u32, ch: &MaskChannel) -> u8 {
    let raw = (word & ch.mask) >> ch.shift;
    if ch.width >= 8 {
        (raw >> (ch.width - 8)) as u8
    } else {
        (raw << (8 - ch.width)) as u8
    }
}

// ============================================================================
// 行级解包
// ============================================================================

fn unpack_masked_row(row: &[u8], out: &mut [u8], word_bytes: usize, masks: &ChannelMasks) {
    for (src, dst) in row.chunks_exact(word_bytes).zip(out.chunks_exact_mut(4)) {
        let word = match word_bytes {
            2 => u32::from(u16::from_le_bytes([src[0], src[1]])),
            _ => u32::from_le_bytes([src[0], src[1], src[2], src[3]]),
        };
        dst[0] = extract_channel(word, &masks.red);
        dst[1] = extract_channel(word, &masks.green);
        dst[2] = extract_channel(word, &masks.blue);
        dst[3] = masks
            .alpha
            .as_ref()
            .map_or(255, |a| extract_channel(word, a));
    }
}

fn unpack_bgra_row(row: &[u8], out: &mut [u8]) {
    for (src, dst) in row.chunks_exact(4).zip(out.chunks_exact_mut(4)) {
        dst[0] = src[2];
        dst[1] = src[1];
        dst[2] = src[0];
        dst[3] = src[3];
    }
}

fn unpack_bgr_row(row: &[u8], out: &mut [u8]) {
    for (src, dst) in row.chunks_exact(3).zip(out.chunks_exact_mut(4)) {
        dst[0] = src[2];
        dst[1] = src[1];
        dst[2] = src[0];
        dst[3] = 255;
    }
}

fn unpack_rgb565_row(row: &[u8], out: &mut [u8]) {
    for (src, dst) in row.chunks_exact(2).zip(out.chunks_exact_mut(4)) {
        let word = u16::from_le_bytes([src[0], src[1]]);
        dst[0] = (((word >> 11) & 0x1F) << 3) as u8;
        dst[1] = (((word >> 5) & 0x3F) << 2) as u8;
        dst[2] = ((word & 0x1F) << 3) as u8;
        dst[3] = 255;
    }
}

fn unpack_palette_row(row: &[u8], out: &mut [u8], palette: &[u8]) {
    for (&index, dst) in row.iter().zip(out.chunks_exact_mut(4)) {
        let base = index as usize * 4;
        match palette.get(base..base + 4) {
            Some(entry) => {
                dst[0] = entry[2];
                dst[1] = entry[1];
                dst[2] = entry[0];
                dst[3] = 255;
            }
            // 越界索引：透明黑，绝不越界读
            None => dst.copy_from_slice(&[0, 0, 0, 0]),
        }
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use crate::header::{EXTENDED_HEADER_SIZE, LEGACY_HEADER_SIZE};

    /// 组装 Legacy DIB：头 + 可选调色板 + 像素行（已按 DIB 行序排列）。
    fn legacy_dib(
        width: i32,
        height: i32,
        bit_count: u16,
        palette: &[u8],
        pixel_rows: &[u8],
    ) -> RawBuffer {
        let mut bytes = vec![0u8; 40];
        bytes[0..4].copy_from_slice(&LEGACY_HEADER_SIZE.to_le_bytes());
        bytes[4..8].copy_from_slice(&width.to_le_bytes());
        bytes[8..12].copy_from_slice(&height.to_le_bytes());
        bytes[12..14].copy_from_slice(&1u16.to_le_bytes());
        bytes[14..16].copy_from_slice(&bit_count.to_le_bytes());
        bytes.extend_from_slice(palette);
        bytes.extend_from_slice(pixel_rows);
        RawBuffer::new(bytes)
    }

    /// 组装带掩码的 Extended DIB。
    fn extended_dib(
        width: i32,
        height: i32,
        bit_count: u16,
        masks: (u32, u32, u32, u32),
        pixel_rows: &[u8],
    ) -> RawBuffer {
        let mut bytes = vec![0u8; 124];
        bytes[0..4].copy_from_slice(&EXTENDED_HEADER_SIZE.to_le_bytes());
        bytes[4..8].copy_from_slice(&width.to_le_bytes());
        bytes[8..12].copy_from_slice(&height.to_le_bytes());
        bytes[12..14].copy_from_slice(&1u16.to_le_bytes());
        bytes[14..16].copy_from_slice(&bit_count.to_le_bytes());
        bytes[40..44].copy_from_slice(&masks.0.to_le_bytes());
        bytes[44..48].copy_from_slice(&masks.1.to_le_bytes());
        bytes[48..52].copy_from_slice(&masks.2.to_le_bytes());
        bytes[52..56].copy_from_slice(&masks.3.to_le_bytes());
        if bit_count == 16 {
            bytes.resize(124 + 1024, 0);
        }
        bytes.extend_from_slice(pixel_rows);
        RawBuffer::new(bytes)
    }

    #[test]
    fn bottom_up_24bit_rows_are_flipped() {
        // 2x2，源第 0 行（缓冲最前）纯蓝，第 1 行纯红；
        // bottom-up 语义下最后一行才是图像顶部
        let rows = [
            255, 0, 0, 255, 0, 0, 0, 0, // 行 0：B=255（蓝），2 字节对齐填充
            0, 0, 255, 0, 0, 255, 0, 0, // 行 1：R=255（红）
        ];
        let buf = legacy_dib(2, 2, 24, &[], &rows);
        let image = decode_dib(&buf).expect("decode should succeed");

        // 顶行应来自源的最后一行（红）
        assert_eq!(image.pixel(0, 0), Some([255, 0, 0, 255]));
        assert_eq!(image.pixel(1, 1), Some([0, 0, 255, 255]));
    }

    #[test]
    fn top_down_rows_are_copied_in_order() {
        let rows = [
            255, 0, 0, 255, 0, 0, 0, 0, // 行 0：蓝
            0, 0, 255, 0, 0, 255, 0, 0, // 行 1：红
        ];
        let buf = legacy_dib(2, -2, 24, &[], &rows);
        let image = decode_dib(&buf).expect("decode should succeed");

        // top-down：首行就是图像顶部（蓝）
        assert_eq!(image.pixel(0, 0), Some([0, 0, 255, 255]));
        assert_eq!(image.pixel(0, 1), Some([255, 0, 0, 255]));
    }

    #[test]
    fn legacy_32bit_is_bgra_with_alpha_passthrough() {
        // 1x1，B=10 G=20 R=30 A=40
        let buf = legacy_dib(1, 1, 32, &[], &[10, 20, 30, 40]);
        let image = decode_dib(&buf).expect("decode should succeed");

        assert_eq!(image.pixel(0, 0), Some([30, 20, 10, 40]));
    }

    #[test]
    fn masked_32bit_without_alpha_mask_is_opaque() {
        // RGB 掩码齐全、alpha 掩码为零：所有输出 alpha 必为 255
        let word = 0x00FF_8040u32; // R=0xFF G=0x80 B=0x40
        let buf = extended_dib(
            1,
            1,
            32,
            (0x00FF_0000, 0x0000_FF00, 0x0000_00FF, 0),
            &word.to_le_bytes(),
        );
        let image = decode_dib(&buf).expect("decode should succeed");

        assert_eq!(image.pixel(0, 0), Some([0xFF, 0x80, 0x40, 255]));
    }

    #[test]
    fn masked_32bit_with_alpha_mask_extracts_alpha() {
        let word = 0x80FF_0000u32; // A=0x80 R=0xFF
        let buf = extended_dib(
            1,
            1,
            32,
            (0x00FF_0000, 0x0000_FF00, 0x0000_00FF, 0xFF00_0000),
            &word.to_le_bytes(),
        );
        let image = decode_dib(&buf).expect("decode should succeed");

        assert_eq!(image.pixel(0, 0), Some([0xFF, 0, 0, 0x80]));
    }

    #[test]
    fn masked_16bit_narrow_channels_are_scaled_up() {
        // 4-4-4 掩码：0xF 应放大到 0xF0
        // 字 0x0F00（只有红通道满值）+ 2 字节行对齐填充
        let buf = extended_dib(1, 1, 16, (0x0F00, 0x00F0, 0x000F, 0), &[0x00, 0x0F, 0, 0]);
        let image = decode_dib(&buf).expect("decode should succeed");

        assert_eq!(image.pixel(0, 0), Some([0xF0, 0, 0, 255]));
    }

    #[test]
    fn non_contiguous_mask_is_rejected() {
        let buf = extended_dib(1, 1, 32, (0x00F0_F000, 0x0000_FF00, 0x0000_00FF, 0), &[0; 4]);

        assert!(matches!(
            decode_dib(&buf),
            Err(CaptureError::UnrecognizedHeader(_))
        ));
    }

    #[test]
    fn unmasked_16bit_defaults_to_rgb565() {
        // 0xF800 = 纯红，0x07E0 = 纯绿
        let mut palette = vec![0u8; 1024];
        palette.fill(0);
        let pixels = [0x00u8, 0xF8, 0xE0, 0x07];
        let buf = legacy_dib(2, 1, 16, &palette, &pixels);
        let image = decode_dib(&buf).expect("decode should succeed");

        assert_eq!(image.pixel(0, 0), Some([248, 0, 0, 255]));
        assert_eq!(image.pixel(1, 0), Some([0, 252, 0, 255]));
    }

    #[test]
    fn palette_lookup_reads_bgr_entries() {
        let mut palette = vec![0u8; 1024];
        // 索引 1：B=1 G=2 R=3
        palette[4..8].copy_from_slice(&[1, 2, 3, 0]);
        let pixels = [1u8, 0, 0, 0]; // 1 像素 + 行对齐填充
        let buf = legacy_dib(1, 1, 8, &palette, &pixels);
        let image = decode_dib(&buf).expect("decode should succeed");

        assert_eq!(image.pixel(0, 0), Some([3, 2, 1, 255]));
    }

    #[test]
    fn out_of_range_palette_index_becomes_transparent_black() {
        // 截短的调色板只有 16 项；索引 200 越界
        let palette = vec![0xAAu8; 64];
        let pixels = [200u8, 0, 0, 0];
        let header = BitmapHeader::parse(&legacy_dib(1, 1, 8, &vec![0u8; 1024], &pixels))
            .expect("parse should succeed");

        let image = unpack(&header, &pixels, Some(&palette)).expect("unpack should succeed");

        assert_eq!(image.pixel(0, 0), Some([0, 0, 0, 0]));
    }

    #[test]
    fn missing_palette_degrades_to_transparent_black() {
        let pixels = [7u8, 0, 0, 0];
        let header = BitmapHeader::parse(&legacy_dib(1, 1, 8, &vec![0u8; 1024], &pixels))
            .expect("parse should succeed");

        let image = unpack(&header, &pixels, None).expect("unpack should succeed");

        assert_eq!(image.pixel(0, 0), Some([0, 0, 0, 0]));
    }

    #[test]
    fn pixel_buffer_rejects_wrong_length() {
        assert!(matches!(
            PixelBuffer::new(2, 2, vec![0u8; 15]),
            Err(CaptureError::Decode(_))
        ));
    }
}
