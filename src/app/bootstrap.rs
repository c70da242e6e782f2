use std::sync::Arc;

use anyhow::anyhow;
use tracing::{error, info, warn};

use crate::app_config::env::env_is_true;
use crate::app_config::redis as app_redis;
use crate::app_config::settings::Settings;
use crate::job::{DailyResetJob, EodJob, PipelineTickJob, QuoteJob, RiskJob, SignalJob};
use crate::time_util::{Clock, SystemClock};
use crate::trading::adapter::alpaca_broker::AlpacaBrokerAdapter;
use crate::trading::adapter::alpaca_quotes::AlpacaQuotesProvider;
use crate::trading::adapter::insight_client::OpenAiInsightClient;
use crate::trading::adapter::paper_ledger::PaperLedgerAdapter;
use crate::trading::adapter::{InsightProvider, QuoteProvider, TradingAdapter};
use crate::trading::cache::daily_counter::DailyCounters;
use crate::trading::cache::kv::{KvStore, MemoryKvStore, RedisKvStore};
use crate::trading::cache::locks::{CooldownGate, DirectionLockGuard, DupEventGate, EtfLockGuard};
use crate::trading::cache::rate_limiter::ApiRateLimiter;
use crate::trading::engine::basket::BasketAggregator;
use crate::trading::engine::llm_gate::LlmInsightGate;
use crate::trading::engine::risk_manager::RiskManager;
use crate::trading::engine::suppression::SuppressionChain;
use crate::trading::market::bar_store::BarStore;
use crate::trading::market::quote_ingestor::QuoteIngestor;
use crate::trading::market::tier::{TickerTier, UniversePartition};
use crate::trading::order::dispatcher::OrderDispatcher;
use crate::trading::services::eod_service::EodService;
use crate::trading::services::notify::Notifier;
use crate::trading::services::pipeline_service::SignalPipeline;

/// 全部有状态组件，启动时从配置显式构建并注入，不留进程级单例
pub struct TradingComponents {
    pub settings: Settings,
    pub clock: Arc<dyn Clock>,
    pub kv: Arc<dyn KvStore>,
    pub bar_store: Arc<BarStore>,
    pub ingestor: Arc<QuoteIngestor>,
    pub pipeline: Arc<SignalPipeline>,
    pub risk: Arc<RiskManager>,
    pub eod: Arc<EodService>,
    pub broker: Arc<dyn TradingAdapter>,
    pub notifier: Arc<Notifier>,
    pub universe: UniversePartition,
}

/// 从环境构建组件图。Redis 不可达时回退进程内KV（单实例纸面模式可用）
pub async fn build_components() -> anyhow::Result<Arc<TradingComponents>> {
    let settings = Settings::from_env();
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);

    // 共享原子存储
    let kv: Arc<dyn KvStore> = match app_redis::get_redis_connection().await {
        Ok(conn) => {
            info!("Redis 连接成功，使用分布式KV");
            Arc::new(RedisKvStore::new(conn))
        }
        Err(e) => {
            warn!("Redis 不可达({})，回退进程内KV（仅限单实例纸面模式）", e);
            Arc::new(MemoryKvStore::new(Arc::clone(&clock)))
        }
    };

    // 券商：AUTO_MODE 开启且有凭证走真实纸面账户，否则进程内台账
    let broker: Arc<dyn TradingAdapter> = if settings.auto_mode {
        match AlpacaBrokerAdapter::from_env() {
            Ok(b) => Arc::new(b),
            Err(e) => {
                return Err(anyhow!("AUTO_MODE 开启但券商凭证缺失: {}", e));
            }
        }
    } else {
        Arc::new(PaperLedgerAdapter::new(Arc::clone(&clock), 100_000.0))
    };

    // 行情
    let quotes: Arc<dyn QuoteProvider> = Arc::new(
        AlpacaQuotesProvider::from_env().map_err(|e| anyhow!("行情凭证缺失: {}", e))?,
    );

    // LLM（可选）
    let insight: Option<Arc<dyn InsightProvider>> = match OpenAiInsightClient::from_env() {
        Ok(c) => Some(Arc::new(c)),
        Err(e) => {
            warn!("LLM 凭证缺失({})，情绪分按中性处理", e);
            None
        }
    };

    let bar_store = BarStore::new();
    let universe = UniversePartition::from_settings(&settings);
    let limiter = Arc::new(ApiRateLimiter::new(
        Arc::clone(&kv),
        Arc::clone(&clock),
        &settings,
    ));
    let ingestor = Arc::new(QuoteIngestor::new(
        quotes,
        Arc::clone(&bar_store),
        limiter,
        Arc::clone(&clock),
        universe.clone(),
    ));

    let counters = Arc::new(DailyCounters::new(Arc::clone(&kv), Arc::clone(&clock)));
    let notifier = Arc::new(Notifier::from_env());

    let llm_gate = Arc::new(LlmInsightGate::new(
        settings.clone(),
        Arc::clone(&kv),
        Arc::clone(&counters),
        Arc::clone(&clock),
        insight,
    ));

    let suppression = Arc::new(SuppressionChain::new(
        settings.clone(),
        CooldownGate::new(Arc::clone(&kv)),
        DirectionLockGuard::new(Arc::clone(&kv)),
        DupEventGate::new(Arc::clone(&kv), Arc::clone(&clock)),
        Arc::clone(&counters),
    ));

    let basket = Arc::new(BasketAggregator::new(
        &settings,
        EtfLockGuard::new(Arc::clone(&kv)),
        Arc::clone(&clock),
    ));

    // 初始权益：优先预算override，否则问券商
    let initial_equity = match settings.sizing_equity_usd() {
        Some(e) => e,
        None => broker
            .get_account()
            .await
            .map(|a| a.equity)
            .unwrap_or(100_000.0),
    };
    let risk = Arc::new(RiskManager::new(settings.clone(), initial_equity));

    let dispatcher = Arc::new(OrderDispatcher::new(
        Arc::clone(&broker),
        Arc::clone(&kv),
        Arc::clone(&clock),
        settings.auto_mode,
    ));

    let pipeline = Arc::new(SignalPipeline::new(
        settings.clone(),
        Arc::clone(&clock),
        Arc::clone(&kv),
        Arc::clone(&bar_store),
        llm_gate,
        suppression,
        basket,
        Arc::clone(&risk),
        Arc::clone(&dispatcher),
        Arc::clone(&broker),
        Arc::clone(&counters),
        Arc::clone(&notifier),
    ));

    let eod = Arc::new(EodService::new(
        settings.clone(),
        Arc::clone(&clock),
        Arc::clone(&broker),
        Arc::clone(&dispatcher),
        Arc::clone(&risk),
        Arc::clone(&counters),
        Arc::clone(&kv),
        Arc::clone(&notifier),
    ));

    Ok(Arc::new(TradingComponents {
        settings,
        clock,
        kv,
        bar_store,
        ingestor,
        pipeline,
        risk,
        eod,
        broker,
        notifier,
        universe,
    }))
}

/// 应用入口总编排：初始化/任务循环/心跳/信号/优雅关闭
pub async fn run() -> anyhow::Result<()> {
    // 初始化并启动调度器容器（EOD与日重置走分钟巡检任务）
    let _scheduler = match crate::init_scheduler().await {
        Ok(s) => s,
        Err(e) => {
            error!("初始化任务调度器失败: {}", e);
            return Err(anyhow!("初始化任务调度器失败: {}", e));
        }
    };

    let components = build_components().await?;
    info!(
        "组件构建完成: universe={}票, auto_mode={}",
        components.universe.all_tickers().len(),
        components.settings.auto_mode
    );

    let mut task_handles = Vec::new();

    // 行情轮询：15秒
    if env_is_true("IS_RUN_QUOTE_JOB", true) {
        let job = QuoteJob::new(Arc::clone(&components.ingestor));
        task_handles.push(tokio::spawn(async move {
            let mut interval = tokio::time::interval(tokio::time::Duration::from_secs(15));
            loop {
                interval.tick().await;
                if let Err(e) = job.run().await {
                    error!("行情任务失败: {}", e);
                }
            }
        }));
    }

    // 快tick：15秒（止损/止盈）
    {
        let job = PipelineTickJob::new(Arc::clone(&components.pipeline));
        task_handles.push(tokio::spawn(async move {
            let mut interval = tokio::time::interval(tokio::time::Duration::from_secs(15));
            loop {
                interval.tick().await;
                if let Err(e) = job.run().await {
                    error!("快tick任务失败: {}", e);
                }
            }
        }));
    }

    // 信号生成：Tier A 与 Tier B 各按自己的节奏
    if env_is_true("IS_RUN_SIGNAL_JOB", true) {
        let job = SignalJob::new(Arc::clone(&components.pipeline));
        let tickers = components.universe.tickers_in(TickerTier::A);
        let cadence = components.settings.tier_a_interval_sec.max(15) as u64;
        task_handles.push(tokio::spawn(async move {
            let mut interval = tokio::time::interval(tokio::time::Duration::from_secs(cadence));
            loop {
                interval.tick().await;
                if let Err(e) = job.run(&tickers).await {
                    error!("TierA 信号任务失败: {}", e);
                }
            }
        }));

        let job_b = SignalJob::new(Arc::clone(&components.pipeline));
        let tickers_b = components.universe.tickers_in(TickerTier::B);
        let cadence_b = components.settings.tier_b_interval_sec.max(30) as u64;
        task_handles.push(tokio::spawn(async move {
            let mut interval = tokio::time::interval(tokio::time::Duration::from_secs(cadence_b));
            loop {
                interval.tick().await;
                if let Err(e) = job_b.run(&tickers_b).await {
                    error!("TierB 信号任务失败: {}", e);
                }
            }
        }));
    }

    // 风险巡检：5分钟
    {
        let job = RiskJob::new(
            Arc::clone(&components.broker),
            Arc::clone(&components.risk),
            Arc::clone(&components.notifier),
            components.settings.daily_loss_limit,
        );
        task_handles.push(tokio::spawn(async move {
            let mut interval = tokio::time::interval(tokio::time::Duration::from_secs(300));
            loop {
                interval.tick().await;
                if let Err(e) = job.run().await {
                    error!("风险任务失败: {}", e);
                }
            }
        }));
    }

    // EOD/OPG 与日界重置：每分钟巡检，窗口逻辑在任务内部
    {
        let eod_job = EodJob::new(Arc::clone(&components.eod), Arc::clone(&components.clock));
        let reset_job = DailyResetJob::new(
            Arc::clone(&components.clock),
            Arc::clone(&components.broker),
            Arc::clone(&components.risk),
        );
        task_handles.push(tokio::spawn(async move {
            let mut interval = tokio::time::interval(tokio::time::Duration::from_secs(60));
            loop {
                interval.tick().await;
                if let Err(e) = eod_job.run().await {
                    error!("EOD任务失败: {}", e);
                }
                if let Err(e) = reset_job.run().await {
                    error!("日重置任务失败: {}", e);
                }
            }
        }));
    }

    // 心跳任务：定期输出运行状态
    let heartbeat_components = Arc::clone(&components);
    let heartbeat_handle = tokio::spawn(async move {
        let mut interval = tokio::time::interval(tokio::time::Duration::from_secs(30));
        loop {
            interval.tick().await;
            let risk = heartbeat_components.risk.snapshot().await;
            info!(
                "💓 程序正在运行中: 持仓{} 并发风险{:.2}% 当日盈亏{:+.2}%",
                risk.open_positions,
                risk.current_risk_pct * 100.0,
                risk.daily_realized_pnl_pct * 100.0
            );
        }
    });

    // 信号处理 - 支持多种退出信号
    let shutdown_signal = setup_shutdown_signals();
    let signal_name = shutdown_signal.await;

    heartbeat_handle.abort();
    info!("接收到 {} 信号，开始优雅关闭...", signal_name);

    // 停止新tick
    for handle in task_handles {
        handle.abort();
    }

    // 优雅关闭：调度器收尾，TTL状态（锁/冷却）留给过期回收
    let shutdown_config = crate::GracefulShutdownConfig::default();
    if let Err(e) = crate::graceful_shutdown_with_config(shutdown_config).await {
        error!("优雅关闭失败: {}", e);
        std::process::exit(1);
    }

    info!("应用已优雅退出");
    Ok(())
}

/// 设置多种退出信号处理
async fn setup_shutdown_signals() -> &'static str {
    use tokio::signal;

    #[cfg(unix)]
    {
        let mut sigterm = signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to register SIGTERM handler");
        let mut sigint = signal::unix::signal(signal::unix::SignalKind::interrupt())
            .expect("Failed to register SIGINT handler");
        let mut sigquit = signal::unix::signal(signal::unix::SignalKind::quit())
            .expect("Failed to register SIGQUIT handler");

        tokio::select! {
            _ = sigterm.recv() => "SIGTERM",
            _ = sigint.recv() => "SIGINT",
            _ = sigquit.recv() => "SIGQUIT",
        }
    }

    #[cfg(not(unix))]
    {
        signal::ctrl_c().await.expect("Failed to listen for ctrl-c");
        "CTRL+C"
    }
}
