use thiserror::Error;

/// 应用错误
#[derive(Error, Debug)]
pub enum AppError {
    /// 业务错误
    #[error("业务错误: {0}")]
    BizError(String),

    /// 审计库错误
    #[error("数据库错误: {0}")]
    DbError(String),

    /// 券商接口错误
    #[error("券商API错误: {0}")]
    BrokerApiError(String),

    /// 行情接口错误
    #[error("行情API错误: {0}")]
    QuoteApiError(String),

    /// Redis 错误
    #[error("Redis错误: {0}")]
    RedisError(String),

    /// 候选信号违反约束（止损方向错误等），仅该候选作废
    #[error("约束违反: {0}")]
    ContractViolation(String),

    /// 未知错误
    #[error("未知错误: {0}")]
    Unknown(String),
}

/// 把任何错误转换为AppError类型
pub fn to_err<E: std::error::Error + Send + Sync + 'static>(err: E) -> AppError {
    AppError::Unknown(err.to_string())
}

impl From<redis::RedisError> for AppError {
    fn from(err: redis::RedisError) -> Self {
        AppError::RedisError(err.to_string())
    }
}

impl From<reqwest::Error> for AppError {
    fn from(err: reqwest::Error) -> Self {
        AppError::BrokerApiError(err.to_string())
    }
}
