//! # 错误模型模块
//!
//! ## 设计思路
//!
//! 使用单一错误枚举承载捕获链路中的所有错误来源，避免字符串拼接式错误处理。
//! 通过 `thiserror` 保持人类可读错误，同时让调用侧可按分支匹配。
//!
//! ## 实现思路
//!
//! 错误分三类，传播策略不同：
//! - **资源获取类**（`ClipboardBusy` / `HandleInvalid` / `ReadFailure`）：
//!   没有剪贴板访问权后续尝试无意义，立即向上传播；其中 `ClipboardBusy`
//!   属瞬态错误，由引擎层按退避策略重试。
//! - **候选格式局部类**（头解析、解包、文件回退相关）：只说明"这一个格式
//!   坏了"，探测器捕获后转为"尝试下一个候选"。
//! - **终态类**（`NoDecodableFormat`）：所有候选耗尽后的最终信号，
//!   对用户语义是"剪贴板上没有图片"，不是异常。

use crate::format::ClipboardFormatId;

/// 捕获链路统一错误类型。
///
/// 上层（CLI / 托盘）根据分支决定提示文案：`NoDecodableFormat` 与
/// `FormatUnavailable` 表示"没有图片可处理"，其余表示"有图片但处理失败"。
#[derive(Debug, thiserror::Error)]
pub enum CaptureError {
    /// 剪贴板被其他进程占用，调用方应退避重试。
    #[error("剪贴板忙：{0}")]
    ClipboardBusy(String),

    /// 请求的格式当前不在剪贴板上。
    #[error("剪贴板格式不可用：{0}")]
    FormatUnavailable(ClipboardFormatId),

    /// 系统声称格式可用，却返回了空句柄或零长度数据。
    #[error("剪贴板句柄无效：{0}")]
    HandleInvalid(String),

    /// 锁定或拷贝全局内存失败。
    #[error("剪贴板读取失败：{0}")]
    ReadFailure(String),

    /// 头部声明的结构大小既不是 BITMAPINFOHEADER 也不是 BITMAPV5HEADER。
    #[error("无法识别的位图头：{0}")]
    UnrecognizedHeader(String),

    /// 位深不在 {8, 16, 24, 32} 之内。
    #[error("不支持的位深：{0} bpp")]
    UnsupportedBitDepth(u16),

    /// 头部声明的尺寸超出了实际缓冲区长度。
    #[error("位图数据不完整：需要 {expected} 字节，实际 {actual} 字节")]
    TruncatedBuffer { expected: usize, actual: usize },

    /// 文件拖放列表中没有任何图片扩展名的条目。
    #[error("拖放列表中没有图片文件")]
    NoImageFileInDrop,

    /// 拖放列表中的图片文件已不存在或无法打开。
    #[error("图片文件不可读：{path}")]
    FileUnreadable {
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// 已编码图片字节（PNG/JPEG 等）解码失败。
    #[error("图片解码失败：{0}")]
    Decode(String),

    /// 所有候选格式均尝试失败或剪贴板为空。
    #[error("剪贴板上没有可解码的图片格式")]
    NoDecodableFormat,

    /// PNG 序列化失败（合法 `PixelBuffer` 下不应发生）。
    #[error("PNG 编码失败：{0}")]
    Encode(String),
}

impl CaptureError {
    /// 该错误是否只影响当前候选格式。
    ///
    /// 探测器据此决定"跳到下一个候选"还是中止整次捕获。
    pub fn is_candidate_local(&self) -> bool {
        matches!(
            self,
            Self::FormatUnavailable(_)
                | Self::UnrecognizedHeader(_)
                | Self::UnsupportedBitDepth(_)
                | Self::TruncatedBuffer { .. }
                | Self::NoImageFileInDrop
                | Self::FileUnreadable { .. }
                | Self::Decode(_)
        )
    }

    /// 该错误是否值得引擎层退避后重试打开剪贴板。
    pub fn is_retryable_open(&self) -> bool {
        matches!(self, Self::ClipboardBusy(_))
    }
}
