#![forbid(unsafe_code)]

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

/// Minimum characters typed into the keyboard scratch field before the keyboard test passes.
pub const KEYBOARD_MIN_TYPED_CHARS: usize = 10;

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DeviceTestName {
    Playback,
    Microphone,
    Keyboard,
}

impl DeviceTestName {
    pub const ALL: [DeviceTestName; 3] = [
        DeviceTestName::Playback,
        DeviceTestName::Microphone,
        DeviceTestName::Keyboard,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            DeviceTestName::Playback => "PLAYBACK",
            DeviceTestName::Microphone => "MICROPHONE",
            DeviceTestName::Keyboard => "KEYBOARD",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "playback" => Some(DeviceTestName::Playback),
            "microphone" => Some(DeviceTestName::Microphone),
            "keyboard" => Some(DeviceTestName::Keyboard),
            _ => None,
        }
    }

    /// `{playback, microphone}`, the lighter of the two observed configurations.
    pub fn audio_pair() -> BTreeSet<DeviceTestName> {
        [DeviceTestName::Playback, DeviceTestName::Microphone]
            .into_iter()
            .collect()
    }

    pub fn full_set() -> BTreeSet<DeviceTestName> {
        Self::ALL.into_iter().collect()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct DeviceTestSnapshot {
    pub playback: bool,
    pub microphone: bool,
    pub keyboard: bool,
}

impl DeviceTestSnapshot {
    pub fn get(&self, test: DeviceTestName) -> bool {
        match test {
            DeviceTestName::Playback => self.playback,
            DeviceTestName::Microphone => self.microphone,
            DeviceTestName::Keyboard => self.keyboard,
        }
    }
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum KeyboardPromptLanguage {
    #[default]
    En,
    Mr,
    Hi,
    Ta,
    Te,
    Kn,
}

impl KeyboardPromptLanguage {
    pub const ALL: [KeyboardPromptLanguage; 6] = [
        KeyboardPromptLanguage::En,
        KeyboardPromptLanguage::Mr,
        KeyboardPromptLanguage::Hi,
        KeyboardPromptLanguage::Ta,
        KeyboardPromptLanguage::Te,
        KeyboardPromptLanguage::Kn,
    ];

    pub fn code(self) -> &'static str {
        match self {
            KeyboardPromptLanguage::En => "en",
            KeyboardPromptLanguage::Mr => "mr",
            KeyboardPromptLanguage::Hi => "hi",
            KeyboardPromptLanguage::Ta => "ta",
            KeyboardPromptLanguage::Te => "te",
            KeyboardPromptLanguage::Kn => "kn",
        }
    }

    pub fn parse(code: &str) -> Option<Self> {
        let code = code.trim().to_ascii_lowercase();
        Self::ALL.into_iter().find(|lang| lang.code() == code)
    }

    pub fn label(self) -> &'static str {
        match self {
            KeyboardPromptLanguage::En => "English",
            KeyboardPromptLanguage::Mr => "मराठी (Marathi)",
            KeyboardPromptLanguage::Hi => "हिंदी (Hindi)",
            KeyboardPromptLanguage::Ta => "தமிழ் (Tamil)",
            KeyboardPromptLanguage::Te => "తెలుగు (Telugu)",
            KeyboardPromptLanguage::Kn => "ಕನ್ನಡ (Kannada)",
        }
    }

    /// Sentence shown above the scratch field. Passing never depends on matching it.
    pub fn prompt_text(self) -> &'static str {
        match self {
            KeyboardPromptLanguage::En => {
                "The quick brown fox jumps over the lazy dog. Type this sentence to test your keyboard."
            }
            KeyboardPromptLanguage::Mr => {
                "मराठी भाषेतील लेखन चाचणी. हा वाक्य टाइप करून तुमचा कीबोर्ड तपासा."
            }
            KeyboardPromptLanguage::Hi => {
                "हिंदी भाषा में लेखन परीक्षा। इस वाक्य को टाइप करके अपना कीबोर्ड जांचें।"
            }
            KeyboardPromptLanguage::Ta => {
                "தமிழ் மொழியில் எழுதும் சோதனை. இந்த வாக்கியத்தை தட்டச்சு செய்து உங்கள் விசைப்பலகையை சரிபார்க்கவும்."
            }
            KeyboardPromptLanguage::Te => {
                "తెలుగు భాషలో రాయడం పరీక్ష. ఈ వాక్యాన్ని టైప్ చేసి మీ కీబోర్డ్ను తనిఖీ చేయండి."
            }
            KeyboardPromptLanguage::Kn => {
                "ಕನ್ನಡ ಭಾಷೆಯಲ್ಲಿ ಬರೆಯುವ ಪರೀಕ್ಷೆ. ಈ ವಾಕ್ಯವನ್ನು ಟೈಪ್ ಮಾಡಿ ನಿಮ್ಮ ಕೀಬೋರ್ಡ್ ಅನ್ನು ಪರಿಶೀಲಿಸಿ."
            }
        }
    }
}
