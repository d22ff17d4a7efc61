#![forbid(unsafe_code)]

use serde::{Deserialize, Serialize};

use crate::ReasonCodeId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum NoticeLevel {
    Success,
    Info,
    Error,
}

/// User-visible notification (the shell renders these as toasts).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notice {
    pub level: NoticeLevel,
    pub reason_code: ReasonCodeId,
    pub message: String,
}

impl Notice {
    pub fn success(reason_code: ReasonCodeId, message: impl Into<String>) -> Self {
        Self {
            level: NoticeLevel::Success,
            reason_code,
            message: message.into(),
        }
    }

    pub fn info(reason_code: ReasonCodeId, message: impl Into<String>) -> Self {
        Self {
            level: NoticeLevel::Info,
            reason_code,
            message: message.into(),
        }
    }

    pub fn error(reason_code: ReasonCodeId, message: impl Into<String>) -> Self {
        Self {
            level: NoticeLevel::Error,
            reason_code,
            message: message.into(),
        }
    }
}
