#![forbid(unsafe_code)]

use serde::{Deserialize, Serialize};

use crate::common::validate_label;
use crate::{ContractViolation, Validate};

/// Static admission data shown before the device test. Display only.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HallTicketInfo {
    pub candidate_name: String,
    pub roll_number: String,
    pub exam_date: String,
    pub exam_time: String,
    pub exam_center: String,
    pub subject: String,
    #[serde(default)]
    pub instructions: Vec<String>,
}

impl HallTicketInfo {
    pub fn sample_v1() -> Self {
        Self {
            candidate_name: "राज कुमार शर्मा".to_string(),
            roll_number: "EX2024001".to_string(),
            exam_date: "२५ डिसेंबर २०२४".to_string(),
            exam_time: "सकाळी १० वाजता".to_string(),
            exam_center: "मुंबई परीक्षा केंद्र".to_string(),
            subject: "मराठी भाषा परीक्षा".to_string(),
            instructions: vec![
                "परीक्षेच्या वेळेपूर्वी ३० मिनिटे येणे आवश्यक".to_string(),
                "Report 30 minutes before exam time".to_string(),
                "वैध ओळखपत्र सोबत आणणे आवश्यक".to_string(),
                "Valid ID proof required".to_string(),
            ],
        }
    }
}

impl Validate for HallTicketInfo {
    fn validate(&self) -> Result<(), ContractViolation> {
        if self.roll_number.trim().is_empty() {
            return Err(ContractViolation::InvalidValue {
                field: "hall_ticket_info.roll_number",
                reason: "must be non-empty",
            });
        }
        validate_label("hall_ticket_info.candidate_name", &self.candidate_name, 128)?;
        validate_label("hall_ticket_info.roll_number", &self.roll_number, 64)?;
        validate_label("hall_ticket_info.exam_date", &self.exam_date, 64)?;
        validate_label("hall_ticket_info.exam_time", &self.exam_time, 64)?;
        validate_label("hall_ticket_info.exam_center", &self.exam_center, 128)?;
        validate_label("hall_ticket_info.subject", &self.subject, 128)?;
        if self.instructions.len() > 16 {
            return Err(ContractViolation::InvalidValue {
                field: "hall_ticket_info.instructions",
                reason: "must contain at most 16 entries",
            });
        }
        for line in &self.instructions {
            validate_label("hall_ticket_info.instructions", line, 256)?;
        }
        Ok(())
    }
}
