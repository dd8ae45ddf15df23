//! # 剪贴板后端模块
//!
//! ## 设计思路
//!
//! 把"与操作系统剪贴板交互"收敛为一对能力接口：`ClipboardBackend`（打开会话）
//! 与 `ClipboardSession`（会话内枚举/读取格式）。头解析、像素解包、探测器等
//! 可移植逻辑只依赖接口，不感知平台；真正平台相关的只有 Win32 实现一处。
//!
//! ## 实现思路
//!
//! - 会话遵循"作用域获取"契约：打开即持有剪贴板独占权，`Drop` 时无条件释放，
//!   任何提前返回、错误路径、panic 展开都不会泄漏剪贴板锁。
//! - 会话生命周期严格一次 open→close：会话随 `Box` 释放即关闭，类型上不存在
//!   "关闭后复用"的调用路径。
//! - 每次 `read_format` 在同一调用内完成 GlobalLock→拷贝→GlobalUnlock，
//!   拷贝出的 `RawBuffer` 拥有独立内存，绝不保留对 OS 内存的活引用。
//! - 非 Windows 平台与测试共用 `MemoryClipboardBackend`。

use std::collections::BTreeMap;
use std::sync::Mutex;

use crate::error::CaptureError;
use crate::format::ClipboardFormatId;

// ============================================================================
// RawBuffer — 拷贝出的原始字节 + 边界检查访问器
// ============================================================================

/// 从剪贴板拷贝出的定长字节序列。
///
/// 所有读取都走边界检查访问器，越界返回 `None` 而不是 panic 或裸指针算术。
#[derive(Debug, Clone)]
pub struct RawBuffer {
    bytes: Vec<u8>,
}

impl RawBuffer {
    pub fn new(bytes: Vec<u8>) -> Self {
        Self { bytes }
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.bytes
    }

    /// 读取小端 u16；越界返回 `None`。
    pub fn read_u16_le(&self, offset: usize) -> Option<u16> {
        let chunk = self.bytes.get(offset..offset.checked_add(2)?)?;
        Some(u16::from_le_bytes([chunk[0], chunk[1]]))
    }

    /// 读取小端 u32；越界返回 `None`。
    pub fn read_u32_le(&self, offset: usize) -> Option<u32> {
        let chunk = self.bytes.get(offset..offset.checked_add(4)?)?;
        Some(u32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
    }

    /// 读取小端 i32；越界返回 `None`。
    pub fn read_i32_le(&self, offset: usize) -> Option<i32> {
        self.read_u32_le(offset).map(|v| v as i32)
    }

    /// 取 `[offset, offset+len)` 子切片；越界返回 `None`。
    pub fn slice(&self, offset: usize, len: usize) -> Option<&[u8]> {
        self.bytes.get(offset..offset.checked_add(len)?)
    }

    /// 从 `offset` 到末尾的子切片；越界返回 `None`。
    pub fn tail(&self, offset: usize) -> Option<&[u8]> {
        self.bytes.get(offset..)
    }
}

// ============================================================================
// 能力接口
// ============================================================================

/// 剪贴板后端：负责打开一次独占会话。
///
/// 打开失败时返回 `ClipboardBusy`（他人持锁）或 `ReadFailure`（其他 OS 错误）。
pub trait ClipboardBackend {
    fn open(&self) -> Result<Box<dyn ClipboardSession + '_>, CaptureError>;
}

/// 一次剪贴板会话内的同步顺序操作。
///
/// 会话内的调用不允许并发交叠；会话被 drop 即释放剪贴板。
pub trait ClipboardSession {
    /// 枚举当前剪贴板上的全部格式（按 OS 返回顺序）。
    fn formats(&mut self) -> Result<Vec<ClipboardFormatId>, CaptureError>;

    /// 查询某格式数据的字节数；格式不存在或无法衡量时返回 `None`。
    ///
    /// 用于启发式扫描的最小体积过滤，避免为了量尺寸做整段拷贝。
    fn format_size(&mut self, format: ClipboardFormatId) -> Option<usize>;

    /// 锁定、拷贝并解锁指定格式的数据。
    fn read_format(&mut self, format: ClipboardFormatId) -> Result<RawBuffer, CaptureError>;

    /// 按名称解析动态注册格式的编号；未注册返回 `None`。
    fn resolve_format_name(&mut self, name: &str) -> Option<ClipboardFormatId>;
}

// ============================================================================
// HRESULT 工具（可移植，便于单测）
// ============================================================================

/// 从 HRESULT 中解出 Win32 错误码（FACILITY_WIN32 映射）。
#[cfg_attr(not(target_os = "windows"), allow(dead_code))]
pub(crate) fn hresult_to_win32_code(hr: i32) -> Option<u32> {
    let value = hr as u32;
    if (value & 0xFFFF_0000) == 0x8007_0000 {
        Some(value & 0xFFFF)
    } else {
        None
    }
}

// ============================================================================
// 内存后端 — 测试替身 + 非 Windows 平台实现
// ============================================================================

/// 进程内模拟剪贴板。
///
/// 格式内容在构造时灌入；`busy_opens` 可让前 N 次 `open` 返回
/// `ClipboardBusy`，用于验证引擎的退避重试路径。
pub struct MemoryClipboardBackend {
    formats: BTreeMap<u32, Vec<u8>>,
    registered_names: BTreeMap<String, u32>,
    busy_opens: Mutex<u32>,
    next_registered_id: u32,
}

impl MemoryClipboardBackend {
    pub fn new() -> Self {
        Self {
            formats: BTreeMap::new(),
            registered_names: BTreeMap::new(),
            busy_opens: Mutex::new(0),
            next_registered_id: crate::format::REGISTERED_FORMAT_MIN + 0x100,
        }
    }

    /// 放入一个标准格式的内容。
    pub fn with_format(mut self, format: ClipboardFormatId, bytes: Vec<u8>) -> Self {
        self.formats.insert(format.0, bytes);
        self
    }

    /// 注册命名格式并放入内容，返回分配到的编号。
    pub fn register_named_format(&mut self, name: &str, bytes: Vec<u8>) -> ClipboardFormatId {
        let id = *self
            .registered_names
            .entry(name.to_string())
            .or_insert_with(|| {
                let id = self.next_registered_id;
                self.next_registered_id += 1;
                id
            });
        self.formats.insert(id, bytes);
        ClipboardFormatId(id)
    }

    /// 让接下来的 `count` 次 `open` 返回 `ClipboardBusy`。
    pub fn with_busy_opens(self, count: u32) -> Self {
        *self.busy_opens.lock().unwrap_or_else(|e| e.into_inner()) = count;
        self
    }
}

impl Default for MemoryClipboardBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl ClipboardBackend for MemoryClipboardBackend {
    fn open(&self) -> Result<Box<dyn ClipboardSession + '_>, CaptureError> {
        let mut busy = self.busy_opens.lock().unwrap_or_else(|e| e.into_inner());
        if *busy > 0 {
            *busy -= 1;
            return Err(CaptureError::ClipboardBusy(
                "模拟：剪贴板被其他进程持有".to_string(),
            ));
        }
        Ok(Box::new(MemorySession { backend: self }))
    }
}

struct MemorySession<'a> {
    backend: &'a MemoryClipboardBackend,
}

impl ClipboardSession for MemorySession<'_> {
    fn formats(&mut self) -> Result<Vec<ClipboardFormatId>, CaptureError> {
        Ok(self
            .backend
            .formats
            .keys()
            .map(|&id| ClipboardFormatId(id))
            .collect())
    }

    fn format_size(&mut self, format: ClipboardFormatId) -> Option<usize> {
        self.backend.formats.get(&format.0).map(Vec::len)
    }

    fn read_format(&mut self, format: ClipboardFormatId) -> Result<RawBuffer, CaptureError> {
        match self.backend.formats.get(&format.0) {
            Some(bytes) if bytes.is_empty() => Err(CaptureError::HandleInvalid(format!(
                "格式 {} 数据长度为零",
                format
            ))),
            Some(bytes) => Ok(RawBuffer::new(bytes.clone())),
            None => Err(CaptureError::FormatUnavailable(format)),
        }
    }

    fn resolve_format_name(&mut self, name: &str) -> Option<ClipboardFormatId> {
        self.backend
            .registered_names
            .get(name)
            .map(|&id| ClipboardFormatId(id))
    }
}

// ============================================================================
// Win32 后端 — 锁定窗口最小化的原生实现
// ============================================================================

#[cfg(target_os = "windows")]
mod win32 {
    use super::*;
    use std::ptr::copy_nonoverlapping;
    use windows::Win32::Foundation::{
        ERROR_ACCESS_DENIED, ERROR_BUSY, ERROR_CLIPBOARD_NOT_OPEN, HGLOBAL,
    };
    use windows::Win32::System::DataExchange::{
        CloseClipboard, EnumClipboardFormats, GetClipboardData, OpenClipboard,
        RegisterClipboardFormatW,
    };
    use windows::Win32::System::Memory::{GlobalLock, GlobalSize, GlobalUnlock};

    /// 生产用 Win32 剪贴板后端。
    pub struct Win32ClipboardBackend;

    impl Win32ClipboardBackend {
        pub fn new() -> Self {
            Self
        }
    }

    impl Default for Win32ClipboardBackend {
        fn default() -> Self {
            Self::new()
        }
    }

    impl ClipboardBackend for Win32ClipboardBackend {
        fn open(&self) -> Result<Box<dyn ClipboardSession + '_>, CaptureError> {
            unsafe {
                OpenClipboard(None).map_err(|e| classify_open_error(&e))?;
            }
            Ok(Box::new(Win32Session { _private: () }))
        }
    }

    /// 持有剪贴板独占权的会话；`Drop` 无条件 `CloseClipboard`。
    struct Win32Session {
        _private: (),
    }

    impl Drop for Win32Session {
        fn drop(&mut self) {
            unsafe {
                let _ = CloseClipboard();
            }
        }
    }

    impl ClipboardSession for Win32Session {
        fn formats(&mut self) -> Result<Vec<ClipboardFormatId>, CaptureError> {
            let mut result = Vec::new();
            let mut current = 0u32;
            loop {
                current = unsafe { EnumClipboardFormats(current) };
                if current == 0 {
                    break;
                }
                result.push(ClipboardFormatId(current));
            }
            Ok(result)
        }

        fn format_size(&mut self, format: ClipboardFormatId) -> Option<usize> {
            let handle = unsafe { GetClipboardData(format.0) }.ok()?;
            if handle.is_invalid() {
                return None;
            }
            let size = unsafe { GlobalSize(HGLOBAL(handle.0)) };
            (size > 0).then_some(size)
        }

        fn read_format(&mut self, format: ClipboardFormatId) -> Result<RawBuffer, CaptureError> {
            let handle = unsafe { GetClipboardData(format.0) }
                .map_err(|_| CaptureError::FormatUnavailable(format))?;
            if handle.is_invalid() || handle.0.is_null() {
                return Err(CaptureError::HandleInvalid(format!(
                    "格式 {} 返回空句柄",
                    format
                )));
            }

            let hglobal = HGLOBAL(handle.0);
            let size = unsafe { GlobalSize(hglobal) };
            if size == 0 {
                return Err(CaptureError::HandleInvalid(format!(
                    "格式 {} 数据长度为零",
                    format
                )));
            }

            // 锁定窗口只覆盖一次 memcpy，拷贝完立即解锁。
            let ptr = unsafe { GlobalLock(hglobal) } as *const u8;
            if ptr.is_null() {
                return Err(CaptureError::ReadFailure(format!(
                    "GlobalLock 对格式 {} 返回空指针",
                    format
                )));
            }

            let mut bytes = vec![0u8; size];
            unsafe {
                copy_nonoverlapping(ptr, bytes.as_mut_ptr(), size);
                let _ = GlobalUnlock(hglobal);
            }

            log::debug!("📋 已拷贝格式 {} 共 {} 字节", format, size);
            Ok(RawBuffer::new(bytes))
        }

        fn resolve_format_name(&mut self, name: &str) -> Option<ClipboardFormatId> {
            let wide: Vec<u16> = name.encode_utf16().chain(std::iter::once(0)).collect();
            let id = unsafe { RegisterClipboardFormatW(windows::core::PCWSTR(wide.as_ptr())) };
            (id != 0).then_some(ClipboardFormatId(id))
        }
    }

    fn classify_open_error(err: &windows::core::Error) -> CaptureError {
        let code = hresult_to_win32_code(err.code().0);
        let message = format!("OpenClipboard 失败: hr=0x{:08X}", err.code().0 as u32);

        match code {
            Some(c)
                if c == ERROR_ACCESS_DENIED.0
                    || c == ERROR_BUSY.0
                    || c == ERROR_CLIPBOARD_NOT_OPEN.0 =>
            {
                CaptureError::ClipboardBusy(message)
            }
            _ => CaptureError::ReadFailure(message),
        }
    }
}

#[cfg(target_os = "windows")]
pub use win32::Win32ClipboardBackend;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::format::{CF_DIB, CF_HDROP};

    #[test]
    fn raw_buffer_accessors_are_bounds_checked() {
        let buf = RawBuffer::new(vec![0x01, 0x02, 0x03, 0x04, 0x05]);

        assert_eq!(buf.read_u32_le(0), Some(0x0403_0201));
        assert_eq!(buf.read_u16_le(3), Some(0x0504));
        assert_eq!(buf.read_u32_le(2), None);
        assert_eq!(buf.read_u16_le(usize::MAX), None);
        assert_eq!(buf.slice(3, 3), None);
        assert_eq!(buf.slice(3, 2), Some(&[0x04, 0x05][..]));
        assert_eq!(buf.tail(5), Some(&[][..]));
        assert_eq!(buf.tail(6), None);
    }

    #[test]
    fn raw_buffer_reads_negative_i32() {
        let buf = RawBuffer::new((-7i32).to_le_bytes().to_vec());
        assert_eq!(buf.read_i32_le(0), Some(-7));
    }

    #[test]
    fn memory_backend_reports_available_formats() {
        let backend = MemoryClipboardBackend::new()
            .with_format(CF_DIB, vec![1, 2, 3])
            .with_format(CF_HDROP, vec![4]);

        let mut session = backend.open().expect("open should succeed");
        let formats = session.formats().expect("formats should enumerate");

        assert_eq!(formats, vec![CF_DIB, CF_HDROP]);
        assert_eq!(session.format_size(CF_DIB), Some(3));
        assert_eq!(session.read_format(CF_DIB).unwrap().as_slice(), &[1, 2, 3]);
    }

    #[test]
    fn memory_backend_missing_format_is_unavailable() {
        let backend = MemoryClipboardBackend::new();
        let mut session = backend.open().expect("open should succeed");

        assert!(matches!(
            session.read_format(CF_DIB),
            Err(CaptureError::FormatUnavailable(f)) if f == CF_DIB
        ));
    }

    #[test]
    fn memory_backend_zero_length_data_is_invalid_handle() {
        let backend = MemoryClipboardBackend::new().with_format(CF_DIB, vec![]);
        let mut session = backend.open().expect("open should succeed");

        assert!(matches!(
            session.read_format(CF_DIB),
            Err(CaptureError::HandleInvalid(_))
        ));
    }

    #[test]
    fn memory_backend_busy_opens_count_down() {
        let backend = MemoryClipboardBackend::new().with_busy_opens(2);

        assert!(matches!(
            backend.open().err(),
            Some(CaptureError::ClipboardBusy(_))
        ));
        assert!(matches!(
            backend.open().err(),
            Some(CaptureError::ClipboardBusy(_))
        ));
        assert!(backend.open().is_ok());
    }

    #[test]
    fn registered_names_resolve_to_stable_ids() {
        let mut backend = MemoryClipboardBackend::new();
        let id_first = backend.register_named_format("PNG", vec![1]);
        let id_again = backend.register_named_format("PNG", vec![2]);
        assert_eq!(id_first, id_again);
        assert!(id_first.is_registered());

        let mut session = backend.open().expect("open should succeed");
        assert_eq!(session.resolve_format_name("PNG"), Some(id_first));
        assert_eq!(session.resolve_format_name("JFIF"), None);
    }

    #[test]
    fn hresult_win32_mapping_matches_facility() {
        assert_eq!(hresult_to_win32_code(0x8007_0005_u32 as i32), Some(5));
        assert_eq!(hresult_to_win32_code(0x8000_4005_u32 as i32), None);
    }
}
