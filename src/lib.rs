//! # 剪贴板图片捕获 — 库入口
//!
//! ## 架构总览
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │                  调用方（托盘工具 / 上层服务）              │
//! │                                                          │
//! │        CaptureEngine::capture_png()  →  PNG 字节          │
//! └───────┬──────────────────────────────────────────────────┘
//!         ↕ Result<T, CaptureError>
//! ┌───────┼──────────────────────────────────────────────────┐
//! │       ↕              捕获链路 (Rust)                      │
//! │                                                          │
//! │  ┌─ capture ──── 引擎：打开重试 + 回退级联状态机            │
//! │  │                                                       │
//! │  ├─ backend ──── ClipboardBackend/Session 能力接口        │
//! │  │   ├─ Win32ClipboardBackend   作用域获取 + 最小锁窗口    │
//! │  │   └─ MemoryClipboardBackend  测试替身                  │
//! │  │                                                       │
//! │  ├─ prober ───── 候选表构建 + 按策略解码单个候选            │
//! │  │   ├─ header      DIB / DIBV5 头解析与几何校验           │
//! │  │   ├─ unpack      位深分派解包 + Y 轴翻转 → RGBA         │
//! │  │   └─ filedrop    DROPFILES 路径表回退                  │
//! │  │                                                       │
//! │  ├─ encoder ──── PNG 序列化 + 可选降采样归一化              │
//! │  ├─ format ───── 格式编号常量与注册区间                    │
//! │  ├─ config ───── 重试 / 阈值 / 资源上限参数                │
//! │  └─ error ────── CaptureError（候选局部 vs 会话级）        │
//! └──────────────────────────────────────────────────────────┘
//! ```
//!
//! ## 模块职责
//!
//! | 模块 | 职责 |
//! |------|------|
//! | [`error`] | 统一错误类型 `CaptureError`，区分候选局部错误与会话级错误 |
//! | [`format`] | 剪贴板格式编号 `ClipboardFormatId`、知名常量、注册区间判定 |
//! | [`backend`] | 剪贴板访问接口与 Win32 / 内存两套实现，`RawBuffer` 边界检查读取 |
//! | [`config`] | 重试策略、启发式阈值与解码资源上限 |
//! | [`header`] | BITMAPINFOHEADER / BITMAPV5HEADER 解析与几何校验 |
//! | [`unpack`] | 8/16/24/32 位像素解包、掩码通道、Y 轴翻转到规范 RGBA |
//! | [`filedrop`] | CF_HDROP 路径表解析与图片文件回退读取 |
//! | [`prober`] | 候选表构建、确定性格式选择、按策略解码 |
//! | [`encoder`] | PNG 编码与可选的降采样归一化 |
//! | [`capture`] | 捕获引擎：带退避的打开重试 + 回退级联编排 |

pub mod backend;
pub mod capture;
pub mod config;
pub mod encoder;
pub mod error;
pub mod filedrop;
pub mod format;
pub mod header;
pub mod prober;
pub mod unpack;

pub use backend::{ClipboardBackend, ClipboardSession, MemoryClipboardBackend, RawBuffer};
#[cfg(target_os = "windows")]
pub use backend::Win32ClipboardBackend;
pub use capture::CaptureEngine;
pub use config::CaptureConfig;
pub use encoder::{DownscaleNormalizer, Normalizer};
pub use error::CaptureError;
pub use format::ClipboardFormatId;
pub use unpack::PixelBuffer;
