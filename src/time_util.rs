use std::collections::HashSet;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Datelike, TimeZone, Timelike, Utc, Weekday};
use chrono_tz::America::New_York;
use chrono_tz::Tz;

pub const BAR_INTERVAL_MS: i64 = 30_000;

/// 可注入时钟：测试中用 FixedClock 模拟会话翻转、DST、EOD 窗口
pub trait Clock: Send + Sync {
    fn now_ms(&self) -> i64;
}

pub struct SystemClock;

impl Clock for SystemClock {
    fn now_ms(&self) -> i64 {
        Utc::now().timestamp_millis()
    }
}

/// 测试用固定时钟，可手动推进
pub struct FixedClock {
    now_ms: AtomicI64,
}

impl FixedClock {
    pub fn new(now_ms: i64) -> Arc<Self> {
        Arc::new(Self {
            now_ms: AtomicI64::new(now_ms),
        })
    }

    pub fn set(&self, ts_ms: i64) {
        self.now_ms.store(ts_ms, Ordering::SeqCst);
    }

    pub fn advance_secs(&self, secs: i64) {
        self.now_ms.fetch_add(secs * 1000, Ordering::SeqCst);
    }
}

impl Clock for FixedClock {
    fn now_ms(&self) -> i64 {
        self.now_ms.load(Ordering::SeqCst)
    }
}

/// 交易时段标签
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionLabel {
    Rth,
    Ext,
    Closed,
}

impl SessionLabel {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionLabel::Rth => "rth",
            SessionLabel::Ext => "ext",
            SessionLabel::Closed => "closed",
        }
    }
}

/// 毫秒时间戳转交易所时区（美东，含DST）
pub fn to_eastern(ts_ms: i64) -> DateTime<Tz> {
    let utc = Utc
        .timestamp_millis_opt(ts_ms)
        .single()
        .unwrap_or_else(|| Utc.timestamp_millis_opt(0).unwrap());
    utc.with_timezone(&New_York)
}

/// 是否交易日：周末休市；假日表命中则休市，未知假日按正常交易日处理
fn is_trading_day(et: &DateTime<Tz>, holidays: &HashSet<String>) -> bool {
    match et.weekday() {
        Weekday::Sat | Weekday::Sun => return false,
        _ => {}
    }
    let ymd = et.format("%Y-%m-%d").to_string();
    !holidays.contains(&ymd)
}

/// 美东会话划分：RTH 09:30-16:00，EXT 04:00-09:30 与 16:00-20:00
pub fn session_label(ts_ms: i64, holidays: &HashSet<String>) -> SessionLabel {
    let et = to_eastern(ts_ms);
    if !is_trading_day(&et, holidays) {
        return SessionLabel::Closed;
    }
    let minutes = (et.hour() * 60 + et.minute()) as i64;
    let rth_open = 9 * 60 + 30;
    let rth_close = 16 * 60;
    let ext_open = 4 * 60;
    let ext_close = 20 * 60;

    if minutes >= rth_open && minutes < rth_close {
        SessionLabel::Rth
    } else if (minutes >= ext_open && minutes < rth_open)
        || (minutes >= rth_close && minutes < ext_close)
    {
        SessionLabel::Ext
    } else {
        SessionLabel::Closed
    }
}

pub fn is_rth(ts_ms: i64, holidays: &HashSet<String>) -> bool {
    session_label(ts_ms, holidays) == SessionLabel::Rth
}

pub fn is_ext(ts_ms: i64, holidays: &HashSet<String>) -> bool {
    session_label(ts_ms, holidays) == SessionLabel::Ext
}

/// EOD 平仓窗口：[收盘前 minutes_before_close 分钟, 收盘)
pub fn is_eod_flatten_window(
    ts_ms: i64,
    minutes_before_close: i64,
    holidays: &HashSet<String>,
) -> bool {
    let et = to_eastern(ts_ms);
    if !is_trading_day(&et, holidays) {
        return false;
    }
    let minutes = (et.hour() * 60 + et.minute()) as i64;
    let rth_close = 16 * 60;
    minutes >= rth_close - minutes_before_close && minutes < rth_close
}

/// 开盘竞价清理窗口：09:25-09:35 美东
pub fn is_opg_cleanup_window(ts_ms: i64, holidays: &HashSet<String>) -> bool {
    let et = to_eastern(ts_ms);
    if !is_trading_day(&et, holidays) {
        return false;
    }
    let minutes = (et.hour() * 60 + et.minute()) as i64;
    minutes >= 9 * 60 + 25 && minutes < 9 * 60 + 35
}

/// 当日计数用的本地日历键（美东），例如 20260315
pub fn day_key(ts_ms: i64) -> String {
    to_eastern(ts_ms).format("%Y%m%d").to_string()
}

/// LLM 月度成本键（美东），例如 202603
pub fn month_key(ts_ms: i64) -> String {
    to_eastern(ts_ms).format("%Y%m").to_string()
}

/// K线时间对齐：epoch 毫秒向下取整到30秒边界
pub fn align_bar_ts(ts_ms: i64) -> i64 {
    ts_ms - ts_ms.rem_euclid(BAR_INTERVAL_MS)
}

/// 当前所在分钟（epoch 分钟编号），令牌桶按分钟记账
pub fn minute_bucket(ts_ms: i64) -> i64 {
    ts_ms / 60_000
}

/// 距当前分钟边界的秒数：Reserve 兜底只在分钟边界后10秒内允许
pub fn secs_into_minute(ts_ms: i64) -> i64 {
    (ts_ms % 60_000) / 1000
}

/// 距下一个美东零点的秒数：当日计数键的TTL，保证日界翻转时恰好过期一次
pub fn secs_until_next_eastern_midnight(ts_ms: i64) -> i64 {
    let et = to_eastern(ts_ms);
    let next_day = (et + chrono::Duration::days(1)).date_naive();
    let midnight = next_day.and_hms_opt(0, 0, 0).unwrap();
    let next = New_York
        .from_local_datetime(&midnight)
        .earliest()
        .unwrap_or_else(|| New_York.from_utc_datetime(&midnight));
    let secs = (next.timestamp_millis() - ts_ms) / 1000;
    secs.max(1)
}

/// 毫秒时间戳格式化为 UTC 字符串
pub fn mill_time_to_datetime(timestamp_ms: i64) -> Result<String, String> {
    match Utc.timestamp_millis_opt(timestamp_ms) {
        chrono::LocalResult::Single(datetime) => {
            let formatted_datetime = datetime.format("%Y-%m-%d %H:%M:%S").to_string();
            Ok(formatted_datetime)
        }
        chrono::LocalResult::None => Err("Invalid timestamp: None".to_string()),
        chrono::LocalResult::Ambiguous(_, _) => Err("Invalid timestamp: Ambiguous".to_string()),
    }
}

/// 毫秒时间戳格式化为美东字符串
pub fn mill_time_to_datetime_eastern(timestamp_ms: i64) -> Result<String, String> {
    match Utc.timestamp_millis_opt(timestamp_ms) {
        chrono::LocalResult::Single(datetime) => {
            let et = datetime.with_timezone(&New_York);
            Ok(et.format("%Y-%m-%d %H:%M:%S").to_string())
        }
        chrono::LocalResult::None => Err("Invalid timestamp: None".to_string()),
        chrono::LocalResult::Ambiguous(_, _) => Err("Invalid timestamp: Ambiguous".to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn et_ms(y: i32, m: u32, d: u32, hh: u32, mm: u32) -> i64 {
        let naive = NaiveDate::from_ymd_opt(y, m, d)
            .unwrap()
            .and_hms_opt(hh, mm, 0)
            .unwrap();
        New_York
            .from_local_datetime(&naive)
            .single()
            .unwrap()
            .timestamp_millis()
    }

    #[test]
    fn session_label_rth_and_ext() {
        let holidays = HashSet::new();
        // 2026-03-06 周五
        assert_eq!(
            session_label(et_ms(2026, 3, 6, 10, 0), &holidays),
            SessionLabel::Rth
        );
        assert_eq!(
            session_label(et_ms(2026, 3, 6, 9, 29), &holidays),
            SessionLabel::Ext
        );
        assert_eq!(
            session_label(et_ms(2026, 3, 6, 9, 30), &holidays),
            SessionLabel::Rth
        );
        assert_eq!(
            session_label(et_ms(2026, 3, 6, 16, 0), &holidays),
            SessionLabel::Ext
        );
        assert_eq!(
            session_label(et_ms(2026, 3, 6, 21, 0), &holidays),
            SessionLabel::Closed
        );
        // 周六全天休市
        assert_eq!(
            session_label(et_ms(2026, 3, 7, 10, 0), &holidays),
            SessionLabel::Closed
        );
    }

    #[test]
    fn session_label_across_dst_transition() {
        let holidays = HashSet::new();
        // 2026-03-08 凌晨2点进入夏令时；之前周五与之后周一的10:00美东都应是RTH
        assert_eq!(
            session_label(et_ms(2026, 3, 6, 10, 0), &holidays),
            SessionLabel::Rth
        );
        assert_eq!(
            session_label(et_ms(2026, 3, 9, 10, 0), &holidays),
            SessionLabel::Rth
        );
        // 两个10:00的UTC偏移不同，毫秒差不是整三天
        let fri = et_ms(2026, 3, 6, 10, 0);
        let mon = et_ms(2026, 3, 9, 10, 0);
        assert_ne!(mon - fri, 3 * 24 * 3600 * 1000);
    }

    #[test]
    fn holiday_closes_session_unknown_holiday_stays_open() {
        let mut holidays = HashSet::new();
        // 独立日配置为假日
        holidays.insert("2026-07-03".to_string());
        assert_eq!(
            session_label(et_ms(2026, 7, 3, 10, 0), &holidays),
            SessionLabel::Closed
        );
        // 未配置的假日按正常交易日处理
        let empty = HashSet::new();
        assert_eq!(
            session_label(et_ms(2026, 7, 3, 10, 0), &empty),
            SessionLabel::Rth
        );
    }

    #[test]
    fn eod_flatten_window_bounds() {
        let holidays = HashSet::new();
        assert!(is_eod_flatten_window(
            et_ms(2026, 3, 6, 15, 55),
            5,
            &holidays
        ));
        assert!(is_eod_flatten_window(
            et_ms(2026, 3, 6, 15, 59),
            5,
            &holidays
        ));
        assert!(!is_eod_flatten_window(
            et_ms(2026, 3, 6, 16, 0),
            5,
            &holidays
        ));
        assert!(!is_eod_flatten_window(
            et_ms(2026, 3, 6, 15, 54),
            5,
            &holidays
        ));
    }

    #[test]
    fn opg_window_bounds() {
        let holidays = HashSet::new();
        assert!(is_opg_cleanup_window(et_ms(2026, 3, 6, 9, 25), &holidays));
        assert!(is_opg_cleanup_window(et_ms(2026, 3, 6, 9, 34), &holidays));
        assert!(!is_opg_cleanup_window(et_ms(2026, 3, 6, 9, 35), &holidays));
        assert!(!is_opg_cleanup_window(et_ms(2026, 3, 6, 9, 24), &holidays));
    }

    #[test]
    fn bar_alignment_floors_to_30s() {
        assert_eq!(align_bar_ts(90_000), 90_000);
        assert_eq!(align_bar_ts(90_001), 90_000);
        assert_eq!(align_bar_ts(119_999), 90_000);
        assert_eq!(align_bar_ts(120_000), 120_000);
    }

    #[test]
    fn day_key_uses_eastern_date() {
        // UTC 2026-03-07 01:00 = 美东 2026-03-06 20:00
        let ts = Utc
            .with_ymd_and_hms(2026, 3, 7, 1, 0, 0)
            .unwrap()
            .timestamp_millis();
        assert_eq!(day_key(ts), "20260306");
    }

    #[test]
    fn fixed_clock_advances() {
        let clock = FixedClock::new(1_000_000);
        assert_eq!(clock.now_ms(), 1_000_000);
        clock.advance_secs(30);
        assert_eq!(clock.now_ms(), 1_030_000);
    }
}
