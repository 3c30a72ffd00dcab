// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license

//! 错误类型
//! Error types shared by the whole crate

use thiserror::Error;

#[derive(Debug, Error)]
pub enum AudienceError {
    #[error("model gateway failed: {0}")]
    Gateway(String),

    #[error("model gateway exceeded {0} ms")]
    GatewayTimeout(u64),

    #[error("failed to access config file {path}: {source}")]
    ConfigIo {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    ConfigParse(#[from] serde_json::Error),

    #[error("image processing failed: {0}")]
    Image(String),

    #[error("unknown track id {0}")]
    UnknownTrack(u32),

    #[error("detection cycle cancelled")]
    Cancelled,
}

pub type Result<T> = std::result::Result<T, AudienceError>;
