//! # 配置模块
//!
//! ## 设计思路
//!
//! 将所有"可调策略"集中到 `CaptureConfig`，保证运行时行为可观测、可调整、
//! 可测试。外部配置文件的加载归上层协作者管，这里只定义参数与生产可用的
//! 默认值。
//!
//! ## 实现思路
//!
//! 参数覆盖三个阶段：打开剪贴板的重试策略、探测阶段的体积阈值、
//! 解码阶段的资源上限。

/// 捕获子系统配置。
#[derive(Debug, Clone)]
pub struct CaptureConfig {
    /// 剪贴板被占用时的最大打开尝试次数。
    pub open_retries: u32,
    /// 重试基础间隔（毫秒），按指数退避放大。
    pub open_retry_delay_ms: u64,
    /// 单次捕获允许的总重试预算（毫秒）。
    pub open_retry_max_total_ms: u64,
    /// 单次退避延迟上限（毫秒）。
    pub open_retry_max_delay_ms: u64,
    /// 启发式扫描阶段的最小格式体积（字节），低于此值不值得尝试解码。
    pub min_heuristic_bytes: usize,
    /// 单个格式允许拷贝的最大字节数，防御恶意的超大负载。
    pub max_format_bytes: usize,
    /// 解码后的像素上限（`width * height`）。
    pub max_decoded_pixels: u64,
    /// 文件拖放回退识别的图片扩展名集合。
    pub image_extensions: Vec<String>,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            open_retries: 3,
            open_retry_delay_ms: 100,
            open_retry_max_total_ms: 1_800,
            open_retry_max_delay_ms: 900,
            min_heuristic_bytes: 1024,
            max_format_bytes: 64 * 1024 * 1024,
            max_decoded_pixels: 40_000_000,
            image_extensions: ["png", "jpg", "jpeg", "bmp", "gif", "webp", "tif", "tiff"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_heuristic_threshold_is_one_kib() {
        let config = CaptureConfig::default();
        assert_eq!(config.min_heuristic_bytes, 1024);
        assert!(config.image_extensions.iter().any(|e| e == "png"));
    }
}
