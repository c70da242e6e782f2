use std::env;

/// 读取布尔型环境变量：支持 true/false/1/0（大小写不敏感）
pub fn env_is_true(key: &str, default: bool) -> bool {
    match env::var(key) {
        Ok(v) => {
            let v = v.trim();
            v.eq_ignore_ascii_case("true") || v == "1"
        }
        Err(_) => default,
    }
}

/// 读取字符串环境变量，若不存在则返回默认值
pub fn env_or_default(key: &str, default: &str) -> String {
    match env::var(key) {
        Ok(v) => v,
        Err(_) => default.to_string(),
    }
}

/// 读取 f64 型环境变量，解析失败同样回退默认值
pub fn env_f64(key: &str, default: f64) -> f64 {
    env::var(key)
        .ok()
        .and_then(|v| v.trim().parse::<f64>().ok())
        .unwrap_or(default)
}

/// 读取整型环境变量
pub fn env_i64(key: &str, default: i64) -> i64 {
    env::var(key)
        .ok()
        .and_then(|v| v.trim().parse::<i64>().ok())
        .unwrap_or(default)
}

/// 当前运行环境（APP_ENV，未设置按 local 处理）
pub fn app_env() -> String {
    env_or_default("APP_ENV", "local")
}

/// 本地环境日志走彩色 stdout，其余环境写滚动文件
pub fn is_local_env() -> bool {
    app_env() == "local"
}

/// 读取逗号分隔的列表，去掉空白项
pub fn env_csv(key: &str, default: &str) -> Vec<String> {
    let raw = env_or_default(key, default);
    raw.split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}
