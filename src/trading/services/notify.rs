use std::env;
use std::time::Duration;

use reqwest::Client;
use serde_json::json;
use tracing::debug;

/// Webhook 告警/播报客户端（Slack 兼容格式）。
/// 发送失败只记日志，绝不反过来影响交易主流程
pub struct Notifier {
    client: Client,
    webhook_url: Option<String>,
    disabled: bool,
}

impl Notifier {
    pub fn from_env() -> Self {
        let webhook_url = env::var("SLACK_WEBHOOK_URL").ok();
        let disabled = env::var("DISABLE_SLACK_ALERTS")
            .map(|v| v == "true" || v == "1")
            .unwrap_or(false);
        Self {
            client: Client::builder()
                .timeout(Duration::from_secs(5))
                .build()
                .expect("reqwest client build failed"),
            webhook_url,
            disabled,
        }
    }

    pub async fn send_text(&self, text: &str) {
        if self.disabled {
            return;
        }
        let url = match &self.webhook_url {
            Some(u) => u.clone(),
            None => {
                debug!("webhook 未配置，跳过通知: {}", text);
                return;
            }
        };
        let body = json!({ "text": text });
        if let Err(e) = self.client.post(&url).json(&body).send().await {
            // 通知失败不重试不报错
            debug!("通知发送失败: {}", e);
        }
    }

    pub async fn send_order_fill(&self, ticker: &str, side: &str, qty: f64, price: f64) {
        self.send_text(&format!(
            "📊 成交: {} {} {}股 @ ${:.2}",
            ticker, side, qty, price
        ))
        .await;
    }

    pub async fn send_risk_alert(&self, message: &str) {
        self.send_text(&format!("🛑 风控告警: {}", message)).await;
    }
}

/// 日志 ERROR 层调用的全局便捷入口
pub async fn send_error_alert(title: &str, body: String) {
    let notifier = Notifier::from_env();
    notifier.send_text(&format!("*{}*\n{}", title, body)).await;
}
