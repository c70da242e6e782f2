use std::env;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;
use tracing::{info, warn};

use crate::error::AppError;
use crate::trading::adapter::{InsightContext, InsightProvider, InsightResult};

const LLM_TIMEOUT_SECS: u64 = 20;
const MAX_INPUT_CHARS: usize = 1000;

#[derive(Deserialize)]
struct ChatChoiceMessage {
    content: String,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatChoiceMessage,
}

#[derive(Deserialize)]
struct ChatCompletionResp {
    choices: Vec<ChatChoice>,
}

/// OpenAI 兼容接口的文本情绪分析客户端。
/// 入参截到1000字符，出参强制收敛到 {-1..1, 15..480分钟}
pub struct OpenAiInsightClient {
    client: Client,
    base_url: String,
    api_key: String,
    model: String,
}

impl OpenAiInsightClient {
    pub fn from_env() -> anyhow::Result<Self> {
        let api_key = env::var("OPENAI_API_KEY")
            .map_err(|_| anyhow::anyhow!("OPENAI_API_KEY must be set"))?;
        Ok(Self {
            client: Client::builder()
                .timeout(Duration::from_secs(LLM_TIMEOUT_SECS))
                .build()
                .expect("reqwest client build failed"),
            base_url: env::var("OPENAI_BASE_URL")
                .unwrap_or_else(|_| "https://api.openai.com".to_string()),
            api_key,
            model: env::var("LLM_MODEL").unwrap_or_else(|_| "gpt-4o-mini".to_string()),
        })
    }

    fn build_prompt(text: &str, ctx: &InsightContext) -> String {
        format!(
            "You are a trading analyst. Analyze this headline/snippet about {} (event: {}).\n\
             Text: {}\n\
             Reply with strict JSON only: {{\"sentiment\": -1..1, \"trigger\": str, \
             \"horizon_minutes\": 15..480, \"summary\": one line}}",
            ctx.ticker, ctx.event_type, text
        )
    }
}

#[async_trait]
impl InsightProvider for OpenAiInsightClient {
    async fn analyze(&self, text: &str, ctx: &InsightContext) -> Result<InsightResult, AppError> {
        let text = if text.len() > MAX_INPUT_CHARS {
            &text[..MAX_INPUT_CHARS]
        } else {
            text
        };
        let body = json!({
            "model": self.model,
            "messages": [
                {"role": "user", "content": Self::build_prompt(text, ctx)}
            ],
            "temperature": 0.2,
            "response_format": {"type": "json_object"},
        });

        let url = format!("{}/v1/chat/completions", self.base_url);
        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| AppError::Unknown(format!("LLM 请求失败: {}", e)))?;

        let status = response.status();
        let raw = response
            .text()
            .await
            .map_err(|e| AppError::Unknown(format!("LLM 响应读取失败: {}", e)))?;
        if !status.is_success() {
            return Err(AppError::Unknown(format!(
                "LLM 请求失败 {}: {}",
                status, raw
            )));
        }

        let resp: ChatCompletionResp = serde_json::from_str(&raw)
            .map_err(|e| AppError::Unknown(format!("LLM 响应解析失败: {}", e)))?;
        let content = resp
            .choices
            .first()
            .map(|c| c.message.content.as_str())
            .unwrap_or("");

        match serde_json::from_str::<InsightResult>(content) {
            Ok(result) => {
                let result = result.normalized();
                info!(
                    "LLM 分析完成: {} {} sentiment={:.2} horizon={}m",
                    ctx.ticker, ctx.event_type, result.sentiment, result.horizon_minutes
                );
                Ok(result)
            }
            Err(e) => {
                // 模型没按格式回，降级为中性而不是让信号流中断
                warn!("LLM 输出非JSON，按中性处理: {} ({})", content, e);
                Ok(InsightResult::neutral())
            }
        }
    }
}
