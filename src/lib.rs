#![allow(dead_code)]
#![allow(unused_variables)]

pub mod app;
pub mod app_config;
pub mod error;
pub mod job;
pub mod time_util;
pub mod trading;

use dotenv::dotenv;
use once_cell::sync::Lazy;

pub async fn app_init() -> anyhow::Result<()> {
    //设置env
    dotenv().ok();
    // 设置日志
    println!("init log config");
    crate::app_config::log::setup_logging().await?;

    //初始化审计库连接（只写审计表，核心决策不回读）
    let _ = crate::app_config::db::init_db().await;
    Ok(())
}

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio_cron_scheduler::JobScheduler;

// 定义全局调度器容器，会在需要时被初始化
pub static SCHEDULER: Lazy<Mutex<Option<Arc<JobScheduler>>>> = Lazy::new(|| Mutex::new(None));

// 初始化调度器的辅助函数
pub async fn init_scheduler() -> anyhow::Result<Arc<JobScheduler>> {
    let mut lock = SCHEDULER.lock().await;

    if lock.is_none() {
        // 只有在调度器未初始化时才创建
        let scheduler = JobScheduler::new().await?;
        let arc_scheduler = Arc::new(scheduler);
        *lock = Some(Arc::clone(&arc_scheduler));
        return Ok(arc_scheduler);
    }

    // 返回已存在的调度器
    Ok(Arc::clone(lock.as_ref().unwrap()))
}

/// 30秒K线。ts 恒为30秒网格上的毫秒时间戳，build 时自动落格，
/// K线仓的同边界合并就靠这一点成立
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Bar {
    ts: i64,
    o: f64,
    h: f64,
    l: f64,
    c: f64,
    v: f64,
    spread_est: f64,
}

impl Bar {
    pub fn builder() -> BarBuilder {
        BarBuilder::default()
    }
    pub fn ts(&self) -> i64 {
        self.ts
    }

    pub fn o(&self) -> f64 {
        self.o
    }

    pub fn h(&self) -> f64 {
        self.h
    }

    pub fn l(&self) -> f64 {
        self.l
    }

    pub fn c(&self) -> f64 {
        self.c
    }

    pub fn v(&self) -> f64 {
        self.v
    }

    pub fn spread_est(&self) -> f64 {
        self.spread_est
    }

    /// 同一边界的两根K线合并：高低取并集，收价与点差取新值，量累计
    pub fn merge_bar(&mut self, other: &Bar) {
        if other.h > self.h {
            self.h = other.h;
        }
        if other.l < self.l {
            self.l = other.l;
        }
        self.c = other.c;
        self.v += other.v;
        if other.spread_est > 0.0 {
            self.spread_est = other.spread_est;
        }
    }

    /// 同一根K线内合并新tick：刷新高低收并累计量
    pub fn merge_tick(&mut self, price: f64, volume: f64, spread_est: Option<f64>) {
        if price > self.h {
            self.h = price;
        }
        if price < self.l {
            self.l = price;
        }
        self.c = price;
        self.v += volume;
        if let Some(s) = spread_est {
            self.spread_est = s;
        }
    }
}

#[derive(Default)]
pub struct BarBuilder {
    ts: Option<i64>,
    o: Option<f64>,
    h: Option<f64>,
    l: Option<f64>,
    c: Option<f64>,
    v: Option<f64>,
    spread_est: Option<f64>,
}

fn required_field(field: Option<f64>, name: &str) -> anyhow::Result<f64> {
    let val = field.ok_or_else(|| anyhow::anyhow!("bar字段缺失: {}", name))?;
    if !val.is_finite() {
        return Err(anyhow::anyhow!("bar字段非有限值: {}={}", name, val));
    }
    Ok(val)
}

impl BarBuilder {
    pub fn ts(mut self, val: i64) -> Self {
        self.ts = Some(val);
        self
    }
    pub fn o(mut self, val: f64) -> Self {
        self.o = Some(val);
        self
    }

    pub fn h(mut self, val: f64) -> Self {
        self.h = Some(val);
        self
    }

    pub fn l(mut self, val: f64) -> Self {
        self.l = Some(val);
        self
    }

    pub fn c(mut self, val: f64) -> Self {
        self.c = Some(val);
        self
    }

    pub fn v(mut self, val: f64) -> Self {
        self.v = Some(val);
        self
    }

    pub fn spread_est(mut self, val: f64) -> Self {
        self.spread_est = Some(val);
        self
    }

    /// 构建并逐条校验K线不变式，违反哪条就报哪条：
    /// 低点为正、高点盖住开收、低点垫住开收、量与点差非负。
    /// 时间戳向下落到30秒网格
    pub fn build(self) -> anyhow::Result<Bar> {
        let ts = self.ts.ok_or_else(|| anyhow::anyhow!("bar字段缺失: ts"))?;
        if ts < 0 {
            return Err(anyhow::anyhow!("bar时间戳为负: {}", ts));
        }
        let o = required_field(self.o, "o")?;
        let h = required_field(self.h, "h")?;
        let l = required_field(self.l, "l")?;
        let c = required_field(self.c, "c")?;
        let v = required_field(self.v, "v")?;

        if l <= 0.0 {
            return Err(anyhow::anyhow!("bar低点必须为正: l={}", l));
        }
        if h < o.max(c) {
            return Err(anyhow::anyhow!("bar高点盖不住开收: h={} o={} c={}", h, o, c));
        }
        if l > o.min(c) {
            return Err(anyhow::anyhow!("bar低点垫不住开收: l={} o={} c={}", l, o, c));
        }
        if v < 0.0 {
            return Err(anyhow::anyhow!("bar成交量为负: {}", v));
        }
        let spread_est = self.spread_est.unwrap_or(0.0);
        if !spread_est.is_finite() || spread_est < 0.0 {
            return Err(anyhow::anyhow!("bar点差非法: {}", spread_est));
        }

        Ok(Bar {
            ts: crate::time_util::align_bar_ts(ts),
            o,
            h,
            l,
            c,
            v,
            spread_est,
        })
    }
}

#[cfg(test)]
mod bar_tests {
    use super::*;

    fn base() -> BarBuilder {
        Bar::builder().o(100.0).h(101.0).l(99.0).c(100.5).v(1_000.0)
    }

    #[test]
    fn build_aligns_ts_to_30s_grid() {
        let bar = base().ts(90_001).build().unwrap();
        assert_eq!(bar.ts(), 90_000);
        let bar = base().ts(120_000).build().unwrap();
        assert_eq!(bar.ts(), 120_000);
    }

    #[test]
    fn high_must_cover_open_and_close() {
        let err = base().ts(0).h(100.2).build().unwrap_err();
        assert!(err.to_string().contains("高点"));
    }

    #[test]
    fn low_must_sit_under_open_and_close() {
        let err = base().ts(0).l(100.2).build().unwrap_err();
        assert!(err.to_string().contains("低点"));
    }

    #[test]
    fn rejects_missing_field_by_name() {
        let err = Bar::builder().ts(0).o(100.0).h(101.0).l(99.0).c(100.5).build();
        assert!(err.unwrap_err().to_string().contains("v"));
    }

    #[test]
    fn rejects_non_finite_and_negative_inputs() {
        assert!(base().ts(0).c(f64::NAN).build().is_err());
        assert!(base().ts(0).v(-1.0).build().is_err());
        assert!(base().ts(0).spread_est(-0.5).build().is_err());
        assert!(base().ts(-30_000).build().is_err());
    }

    #[test]
    fn merge_tick_expands_range_and_accumulates_volume() {
        let mut bar = base().ts(0).build().unwrap();
        bar.merge_tick(102.0, 500.0, Some(0.03));
        assert_eq!(bar.h(), 102.0);
        assert_eq!(bar.c(), 102.0);
        assert_eq!(bar.v(), 1_500.0);
        assert_eq!(bar.spread_est(), 0.03);
    }
}

/// 优雅关闭配置
#[derive(Debug, Clone)]
pub struct GracefulShutdownConfig {
    pub total_timeout_secs: u64,
    pub job_stop_timeout_secs: u64,
    pub scheduler_shutdown_timeout_secs: u64,
    pub broker_drain_timeout_secs: u64,
}

impl Default for GracefulShutdownConfig {
    fn default() -> Self {
        Self {
            total_timeout_secs: 30,
            job_stop_timeout_secs: 20,
            scheduler_shutdown_timeout_secs: 5,
            broker_drain_timeout_secs: 10,
        }
    }
}

/// 按配置执行优雅关闭：停调度器，在途请求等到超时，TTL状态交给过期回收
pub async fn graceful_shutdown_with_config(config: GracefulShutdownConfig) -> anyhow::Result<()> {
    let mut lock = SCHEDULER.lock().await;
    if let Some(scheduler) = lock.take() {
        let res = tokio::time::timeout(
            tokio::time::Duration::from_secs(config.scheduler_shutdown_timeout_secs),
            async {
                match Arc::try_unwrap(scheduler) {
                    Ok(mut s) => s.shutdown().await.map_err(anyhow::Error::from),
                    Err(_) => Ok(()),
                }
            },
        )
        .await;
        if res.is_err() {
            tracing::error!(
                "调度器关闭超时 ({}秒)",
                config.scheduler_shutdown_timeout_secs
            );
        }
    }
    Ok(())
}
