// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license
/// 火情哨兵 (Fire Sentinel)
///
/// 回放预计算检测结果, 跟踪火点并发送告警
///
/// 系统架构:
/// 1. 主线程:   帧读取 → 检测过滤 → IOU跟踪 → 事件管理 (帧同步)
/// 2. 告警线程: 有界队列 → 去重 / 限流 / 重试 → Telegram
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use fire_sentinel::detection::ReplayDetector;
use fire_sentinel::notify::{AlertTransport, Dispatcher, LogTransport, Notifier, TelegramTransport};
use fire_sentinel::pipeline::{FirePipeline, ReplaySource, ShutdownSignal};
use fire_sentinel::{SentinelConfig, SystemClock};

/// 火情哨兵参数
#[derive(Parser, Debug)]
#[command(author, version, about = "火情哨兵 - 火点跟踪与告警", long_about = None)]
struct Args {
    /// 配置文件 (不存在时写出默认配置)
    #[arg(short, long, default_value = "fire_sentinel.json")]
    config: PathBuf,

    /// 检测结果回放文件 (JSON Lines)
    #[arg(short, long)]
    replay: PathBuf,

    /// 日志级别: error / warn / info / debug / trace
    #[arg(long, default_value = "info")]
    log_level: String,

    /// 只记录告警, 不发送
    #[arg(long, default_value_t = false)]
    dry_run: bool,
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let level = args
        .log_level
        .parse::<tracing_subscriber::filter::LevelFilter>()
        .unwrap_or(tracing_subscriber::filter::LevelFilter::INFO);
    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_target(false)
        .init();

    tracing::info!("🚀 火情哨兵启动");

    // ========== 配置 ==========
    let mut config = SentinelConfig::load(&args.config)
        .with_context(|| format!("加载配置失败: {}", args.config.display()))?;
    config.apply_env();
    config.validate().context("配置校验失败")?;
    config.print_summary();

    // ========== 告警通道 ==========
    let transport: Arc<dyn AlertTransport> = if args.dry_run {
        tracing::info!("📝 dry-run: 告警只写日志");
        Arc::new(LogTransport::new())
    } else if config.telegram.is_usable() {
        tracing::info!("📨 Telegram 告警已启用");
        Arc::new(TelegramTransport::new(&config.telegram))
    } else {
        tracing::warn!("⚠️  Telegram 未启用或缺少凭证, 告警只写日志");
        Arc::new(LogTransport::new())
    };

    let chat_target = if config.telegram.chat_id.is_empty() {
        "log".to_string()
    } else {
        config.telegram.chat_id.clone()
    };
    let dispatcher = Dispatcher::new(
        &config.notifier,
        transport,
        Arc::new(SystemClock::new()),
        chat_target,
    );
    let notifier = Notifier::start(&config.notifier, dispatcher)?;

    // ========== 流水线 ==========
    let mut source = ReplaySource::open(&args.replay)
        .with_context(|| format!("打开回放文件失败: {}", args.replay.display()))?;
    let mut pipeline = FirePipeline::new(&config, ReplayDetector, notifier);
    spawn_signal_listener(pipeline.shutdown_signal()).context("注册中断信号失败")?;

    let stats = pipeline.run(&mut source);
    if source.skipped() > 0 {
        tracing::warn!(skipped = source.skipped(), "⚠️  回放文件中有无效行");
    }

    // ========== 关闭 ==========
    let mut notifier = pipeline.into_sink();
    let metrics = notifier.shutdown();

    println!();
    println!("{}", serde_json::to_string_pretty(&stats)?);
    println!("{}", serde_json::to_string_pretty(&metrics)?);
    metrics.log();

    tracing::info!("👋 火情哨兵退出");
    Ok(())
}

/// 后台线程等待 Ctrl-C / SIGTERM, 收到后请求流水线停止 (告警队列随后正常排空)
fn spawn_signal_listener(shutdown: ShutdownSignal) -> anyhow::Result<()> {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;

    std::thread::Builder::new()
        .name("signal".to_string())
        .spawn(move || {
            runtime.block_on(async {
                tokio::select! {
                    result = tokio::signal::ctrl_c() => {
                        if let Err(e) = result {
                            tracing::warn!(error = %e, "⚠️  无法监听 Ctrl-C");
                            return;
                        }
                    }
                    _ = terminate() => {}
                }
                tracing::warn!("🛑 收到中断信号, 停止读取新帧");
                shutdown.request();
            });
        })?;
    Ok(())
}

#[cfg(unix)]
async fn terminate() {
    use tokio::signal::unix::{signal, SignalKind};
    match signal(SignalKind::terminate()) {
        Ok(mut sigterm) => {
            sigterm.recv().await;
        }
        Err(e) => {
            tracing::warn!(error = %e, "⚠️  无法监听 SIGTERM");
            std::future::pending::<()>().await;
        }
    }
}

#[cfg(not(unix))]
async fn terminate() {
    std::future::pending::<()>().await;
}
