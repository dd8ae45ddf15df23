//! # 捕获引擎模块
//!
//! ## 设计思路
//!
//! 引擎是整条链路的编排者：带退避地打开剪贴板会话，驱动探测状态机走完
//! `Probing → Decoding → FallbackFileList → HeuristicScan → Exhausted`
//! 级联，把第一个解码成功的候选交给编码层。状态迁移集中在一个 `match`
//! 里，每一步只消费队首候选，回退顺序一目了然。
//!
//! ## 实现思路
//!
//! - 打开剪贴板可能撞上其他进程持锁（`ClipboardBusy`），采用
//!   指数退避 + 抖动重试，受单次延迟上限与总预算双重约束。
//! - 整个探测在同一次会话内完成；会话随引擎方法返回即释放。
//! - 候选局部错误记日志换下一个；资源获取类错误立即上抛。
//! - 空剪贴板快速返回 `NoDecodableFormat`，不触碰文件系统。

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use crate::backend::{ClipboardBackend, ClipboardSession};
use crate::config::CaptureConfig;
use crate::encoder::{self, Normalizer};
use crate::error::CaptureError;
use crate::format::ClipboardFormatId;
use crate::prober::{self, Candidate, DecodeStrategy, ProbeState};
use crate::unpack::PixelBuffer;

// ============================================================================
// 退避抖动（无锁 xorshift，进程内共享状态）
// ============================================================================

static JITTER_STATE: AtomicU64 = AtomicU64::new(0);

fn seed_jitter_state() -> u64 {
    let time_seed = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos() as u64)
        .unwrap_or(0);
    let mut state = time_seed ^ ((std::process::id() as u64) << 32) ^ 0x9E37_79B9_7F4A_7C15;
    if state == 0 {
        state = 0xA5A5_5A5A_0123_4567;
    }
    state
}

fn next_jitter_u64() -> u64 {
    let mut current = JITTER_STATE.load(Ordering::Relaxed);

    loop {
        let seeded = if current == 0 {
            seed_jitter_state()
        } else {
            current
        };

        let mut next = seeded;
        next ^= next << 13;
        next ^= next >> 7;
        next ^= next << 17;

        match JITTER_STATE.compare_exchange_weak(current, next, Ordering::Relaxed, Ordering::Relaxed)
        {
            Ok(_) => return next,
            Err(observed) => current = observed,
        }
    }
}

fn compute_backoff_delay_with_jitter(base_delay_ms: u64, attempt: u32, max_delay_ms: u64) -> u64 {
    let exp = base_delay_ms.saturating_mul(1_u64 << attempt.saturating_sub(1).min(8));
    let capped = exp.min(max_delay_ms.max(base_delay_ms));
    let jitter_bound = (capped / 3).max(1);
    let jitter = next_jitter_u64() % (jitter_bound + 1);
    capped.saturating_add(jitter)
}

fn would_exceed_retry_budget(elapsed_ms: u64, wait_ms: u64, budget_ms: u64) -> bool {
    elapsed_ms.saturating_add(wait_ms) > budget_ms
}

// ============================================================================
// 捕获引擎
// ============================================================================

/// 剪贴板图片捕获引擎。
///
/// 泛型于后端：生产环境注入 `Win32ClipboardBackend`，测试注入
/// `MemoryClipboardBackend`。
pub struct CaptureEngine<B: ClipboardBackend> {
    backend: B,
    config: CaptureConfig,
    normalizer: Option<Box<dyn Normalizer + Send + Sync>>,
}

impl<B: ClipboardBackend> CaptureEngine<B> {
    pub fn new(backend: B) -> Self {
        Self {
            backend,
            config: CaptureConfig::default(),
            normalizer: None,
        }
    }

    pub fn with_config(mut self, config: CaptureConfig) -> Self {
        self.config = config;
        self
    }

    /// 挂一个编码前归一化器（降采样等）。失败只降级，不中断捕获。
    pub fn with_normalizer(mut self, normalizer: Box<dyn Normalizer + Send + Sync>) -> Self {
        self.normalizer = Some(normalizer);
        self
    }

    /// 捕获剪贴板上的图片并解码到规范 RGBA。
    pub fn capture_pixels(&self) -> Result<PixelBuffer, CaptureError> {
        let mut session = self.open_with_retry()?;
        self.run_probe(session.as_mut())
    }

    /// 捕获并编码为 PNG 字节。
    pub fn capture_png(&self) -> Result<Vec<u8>, CaptureError> {
        let image = self.capture_pixels()?;
        encoder::encode_png_normalized(
            image,
            self.normalizer.as_deref().map(|n| n as &dyn Normalizer),
        )
    }

    /// 带指数退避 + 抖动的剪贴板打开。
    ///
    /// 只有 `ClipboardBusy` 触发重试；其余打开错误立即上抛。
    fn open_with_retry(&self) -> Result<Box<dyn ClipboardSession + '_>, CaptureError> {
        let retry_count = self.config.open_retries.max(1);
        let started = Instant::now();
        let mut last_error = None;

        for attempt in 1..=retry_count {
            if attempt > 1 {
                let elapsed_ms = started.elapsed().as_millis() as u64;
                if elapsed_ms >= self.config.open_retry_max_total_ms {
                    log::warn!(
                        "⏱️ 剪贴板打开重试预算耗尽（{}ms >= {}ms）",
                        elapsed_ms,
                        self.config.open_retry_max_total_ms
                    );
                    break;
                }

                let wait_ms = compute_backoff_delay_with_jitter(
                    self.config.open_retry_delay_ms.max(1),
                    attempt - 1,
                    self.config.open_retry_max_delay_ms,
                );

                if would_exceed_retry_budget(elapsed_ms, wait_ms, self.config.open_retry_max_total_ms)
                {
                    log::warn!(
                        "⏱️ 跳过第 {} 次打开重试：等待 {}ms 会超过预算 {}ms",
                        attempt,
                        wait_ms,
                        self.config.open_retry_max_total_ms
                    );
                    break;
                }

                log::debug!(
                    "🔄 打开重试 {}/{}，等待 {}ms（指数退避+抖动）",
                    attempt,
                    retry_count,
                    wait_ms
                );
                std::thread::sleep(Duration::from_millis(wait_ms));
            }

            match self.backend.open() {
                Ok(session) => {
                    if attempt > 1 {
                        log::info!("✅ 剪贴板打开成功（尝试 {}）", attempt);
                    }
                    return Ok(session);
                }
                Err(err) if err.is_retryable_open() => {
                    log::warn!("❌ 打开尝试 {} 失败：{}", attempt, err);
                    last_error = Some(err);
                }
                Err(err) => return Err(err),
            }
        }

        Err(last_error
            .unwrap_or_else(|| CaptureError::ClipboardBusy("剪贴板持续被占用".to_string())))
    }

    /// 驱动回退级联状态机，返回第一个解码成功的图片。
    fn run_probe(&self, session: &mut dyn ClipboardSession) -> Result<PixelBuffer, CaptureError> {
        let formats = session.formats()?;
        log::debug!("🔍 剪贴板格式：{:?}", formats);

        if formats.is_empty() {
            log::info!("📋 剪贴板为空，无可解码格式");
            return Err(CaptureError::NoDecodableFormat);
        }

        let mut state = ProbeState::Probing;
        let mut plan: VecDeque<Candidate> = VecDeque::new();
        let mut pending_filedrop: Option<Candidate> = None;
        let mut tried: Vec<ClipboardFormatId> = Vec::new();

        loop {
            state = match state {
                ProbeState::Probing => {
                    plan = prober::plan_candidates(session, &formats).into();
                    log::debug!("🔍 候选表共 {} 项", plan.len());
                    if plan.is_empty() {
                        ProbeState::HeuristicScan
                    } else {
                        ProbeState::Decoding
                    }
                }

                ProbeState::Decoding => match plan.pop_front() {
                    None => ProbeState::HeuristicScan,
                    Some(candidate)
                        if matches!(candidate.strategy, DecodeStrategy::FileDrop) =>
                    {
                        pending_filedrop = Some(candidate);
                        ProbeState::FallbackFileList
                    }
                    Some(candidate) => {
                        tried.push(candidate.format);
                        match self.try_candidate(session, candidate)? {
                            Some(image) => return Ok(image),
                            None => ProbeState::Decoding,
                        }
                    }
                },

                ProbeState::FallbackFileList => {
                    // Probing 阶段保证进入本状态前已设置 pending_filedrop
                    let candidate =
                        pending_filedrop.take().ok_or(CaptureError::NoDecodableFormat)?;
                    log::info!("📁 内联格式未命中，尝试文件拖放回退");
                    tried.push(candidate.format);
                    match self.try_candidate(session, candidate)? {
                        Some(image) => return Ok(image),
                        None => ProbeState::Decoding,
                    }
                }

                ProbeState::HeuristicScan => {
                    let leftovers =
                        prober::heuristic_candidates(session, &formats, &tried, &self.config);
                    log::debug!("🔍 启发式兜底扫描 {} 个剩余格式", leftovers.len());

                    let mut found = None;
                    for candidate in leftovers {
                        tried.push(candidate.format);
                        if let Some(image) = self.try_candidate(session, candidate)? {
                            found = Some(image);
                            break;
                        }
                    }
                    match found {
                        Some(image) => return Ok(image),
                        None => ProbeState::Exhausted,
                    }
                }

                ProbeState::Exhausted => {
                    log::info!("📋 所有候选耗尽，剪贴板上没有可解码图片");
                    return Err(CaptureError::NoDecodableFormat);
                }
            };
        }
    }

    /// 尝试单个候选：成功返回 `Some(图片)`，候选局部失败返回 `None`，
    /// 资源获取类错误上抛。
    fn try_candidate(
        &self,
        session: &mut dyn ClipboardSession,
        candidate: Candidate,
    ) -> Result<Option<PixelBuffer>, CaptureError> {
        log::debug!(
            "🧩 尝试候选 {}（策略 {:?}）",
            candidate.format,
            candidate.strategy
        );

        match prober::decode_candidate(session, candidate, &self.config) {
            Ok(image) => {
                log::info!(
                    "✅ 候选 {} 解码成功：{}x{}",
                    candidate.format,
                    image.width,
                    image.height
                );
                Ok(Some(image))
            }
            Err(err) if err.is_candidate_local() => {
                log::warn!("⚠️ 候选 {} 解码失败，换下一个：{}", candidate.format, err);
                Ok(None)
            }
            Err(err) => Err(err),
        }
    }
}
