use crate::session::CallOutcome;
use serde::Serialize;

/// Transcripts this short are ringback or hold tones that Whisper turned into noise words.
const MAX_WAITING_TONE_CHARS: usize = 8;

const LEAVE_MESSAGE: &[&str] = &[
    "quý khách vui lòng để lại lời nhắn sau tiếng bíp",
    "cuộc gọi được tính theo cước thoại thông thường",
    "do thuê bao quý khách vừa gọi",
    "cước thoại thông thường",
    "lời nhắn sau tiếng bíp",
    "cuộc gọi được tính",
    "để lại lời nhắn",
    "sau tiếng bíp",
    "hiện đang bận",
    "tiếng bíp",
    "lời nhắn",
    "được tính",
    "cước thoại",
];

const BLOCKED: &[&str] = &["đang tạm khóa", "tạm khóa", "khóa"];

const CANNOT_CONNECT: &[&str] = &[
    "vừa gọi tạm thời không liên lạc được xin quý khách",
    "tạm thời không liên lạc được",
    "không liên lạc được",
    "không liên lạc",
    "tạm thời không",
];

const INCORRECT: &[&str] = &[
    "hoặc liên hệ số một chín tám để được hỗ trợ",
    "số máy quý khách vừa gọi không đúng",
    "vui lòng kiểm tra lại",
    "vừa gọi không đúng",
    "hoặc liên hệ số",
    "để được hỗ trợ",
    "kiểm tra lại",
    "kiểm tra",
    "không đúng",
];

/// What a call transcript sounds like.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TranscriptLabel {
    LeaveMessage,
    Blocked,
    CannotConnect,
    Incorrect,
    Ringback,
    WaitingTone,
    Mute,
}

impl TranscriptLabel {
    pub fn outcome(self) -> CallOutcome {
        match self {
            TranscriptLabel::CannotConnect => CallOutcome::NoSubscriber,
            TranscriptLabel::Incorrect | TranscriptLabel::Blocked => CallOutcome::InvalidNumber,
            TranscriptLabel::LeaveMessage
            | TranscriptLabel::Ringback
            | TranscriptLabel::WaitingTone
            | TranscriptLabel::Mute => CallOutcome::Active,
        }
    }
}

/// Label a transcript by the first keyword list that matches, in list order.
pub fn classify_keywords(text: &str) -> TranscriptLabel {
    let text = text.trim().to_lowercase();
    if text.is_empty() {
        return TranscriptLabel::Mute;
    }
    if text.chars().count() <= MAX_WAITING_TONE_CHARS {
        return TranscriptLabel::WaitingTone;
    }
    let lists = [
        (TranscriptLabel::LeaveMessage, LEAVE_MESSAGE),
        (TranscriptLabel::Blocked, BLOCKED),
        (TranscriptLabel::CannotConnect, CANNOT_CONNECT),
        (TranscriptLabel::Incorrect, INCORRECT),
    ];
    lists
        .iter()
        .find(|(_, keywords)| keywords.iter().any(|kw| text.contains(kw)))
        .map_or(TranscriptLabel::Ringback, |(label, _)| *label)
}
