//! Whisper speech-to-text, used as a keyword fallback on the local-audio path.
//!
//! Models are expensive to load, so a fixed number of them are created up front and
//! shared by every port worker through [`ModelPool`].

mod keywords;
mod pool;

pub use keywords::{classify_keywords, TranscriptLabel};
pub use pool::{ModelPool, PoolStats, PooledModel};

use crate::audio::{resample, TARGET_RATE};
use crate::log_debug_content;
use anyhow::Result;
use regex::Regex;
use std::sync::OnceLock;

/// Opaque speech-to-text service. Input is mono PCM at [`TARGET_RATE`].
pub trait Transcribe: Send {
    fn transcribe(&self, samples: &[f32]) -> Result<String>;
}

pub type SttPool = ModelPool<Box<dyn Transcribe>>;

/// Load `size` Whisper instances for `lang`.
pub fn load_whisper_pool(model_path: &str, lang: &str, size: usize) -> Result<SttPool> {
    ModelPool::load(size, |_| {
        let transcriber = WhisperTranscriber::new(model_path, lang)?;
        Ok(Box::new(transcriber) as Box<dyn Transcribe>)
    })
}

/// Borrow a model from the pool and transcribe a clip recorded at `sample_rate`.
pub fn transcribe_clip(pool: &SttPool, samples: &[f32], sample_rate: u32) -> Result<String> {
    let audio = resample(samples, sample_rate, TARGET_RATE);
    let model = pool.acquire()?;
    let raw = model.transcribe(&audio)?;
    drop(model);
    let text = sanitize_transcript(&raw);
    log_debug_content(&format!("stt transcript: {text:?}"));
    Ok(text)
}

/// Drop Whisper's non-speech markers and collapse whitespace.
pub(crate) fn sanitize_transcript(text: &str) -> String {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return String::new();
    }
    static NON_SPEECH_RE: OnceLock<Regex> = OnceLock::new();
    let re = NON_SPEECH_RE.get_or_init(|| {
        Regex::new(
            r"(?i)\[\s*\]|\(\s*\)|\[(?:\s*(?:silence|noise|inaudible|blank_audio|blank audio|music|laughter|applause|cough|breath(?:ing)?|background)\s*)\]|\((?:\s*(?:silence|noise|inaudible|blank audio|music|laughter|applause|cough|breath(?:ing)?|background)\s*)\)",
        )
        .expect("non-speech regex should compile")
    });
    re.replace_all(trimmed, " ")
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(unix)]
mod platform {
    use super::Transcribe;
    use crate::log_debug;
    use anyhow::{anyhow, Context, Result};
    use std::io;
    use std::os::raw::{c_char, c_uint, c_void};
    use std::os::unix::io::AsRawFd;
    use std::sync::Once;
    use whisper_rs::{FullParams, SamplingStrategy, WhisperContext, WhisperContextParameters};

    /// One loaded GGML model. Each instance serves one call at a time.
    pub struct WhisperTranscriber {
        ctx: WhisperContext,
        lang: String,
    }

    impl WhisperTranscriber {
        /// Load the model with stderr silenced; whisper.cpp is chatty during init.
        pub fn new(model_path: &str, lang: &str) -> Result<Self> {
            install_whisper_log_silencer();

            let null = std::fs::OpenOptions::new()
                .write(true)
                .open("/dev/null")
                .context("failed to open /dev/null")?;
            let null_fd = null.as_raw_fd();

            // SAFETY: fd 2 is duplicated and restored before returning; no other
            // code in this function writes to stderr in between.
            let orig_stderr = unsafe { libc::dup(2) };
            if orig_stderr < 0 {
                return Err(anyhow!(
                    "failed to dup stderr: {}",
                    io::Error::last_os_error()
                ));
            }
            let dup_result = unsafe { libc::dup2(null_fd, 2) };
            if dup_result < 0 {
                unsafe {
                    libc::close(orig_stderr);
                }
                return Err(anyhow!(
                    "failed to redirect stderr: {}",
                    io::Error::last_os_error()
                ));
            }

            let ctx_result =
                WhisperContext::new_with_params(model_path, WhisperContextParameters::default());

            let restore_result = unsafe { libc::dup2(orig_stderr, 2) };
            unsafe {
                libc::close(orig_stderr);
            }
            if restore_result < 0 {
                return Err(anyhow!(
                    "failed to restore stderr: {}",
                    io::Error::last_os_error()
                ));
            }

            let ctx = ctx_result.context("failed to load whisper model")?;
            Ok(Self {
                ctx,
                lang: lang.to_string(),
            })
        }
    }

    impl Transcribe for WhisperTranscriber {
        fn transcribe(&self, samples: &[f32]) -> Result<String> {
            let mut state = self
                .ctx
                .create_state()
                .context("failed to create whisper state")?;
            let mut params = FullParams::new(SamplingStrategy::Greedy { best_of: 1 });
            if self.lang.eq_ignore_ascii_case("auto") {
                params.set_language(None);
                params.set_detect_language(true);
            } else {
                params.set_language(Some(&self.lang));
                params.set_detect_language(false);
            }
            params.set_temperature(0.0);
            // Several ports may transcribe at once; keep each model to a few cores.
            params.set_n_threads(num_cpus::get().clamp(1, 4) as i32);
            params.set_print_progress(false);
            params.set_print_timestamps(false);
            params.set_print_special(false);
            params.set_print_realtime(false);
            params.set_translate(false);
            params.set_token_timestamps(false);
            state.full(params, samples)?;

            let mut transcript = String::new();
            let num_segments = match state.full_n_segments() {
                Ok(count) => count,
                Err(err) => {
                    log_debug(&format!("whisper failed to read segment count: {err}"));
                    return Ok(transcript);
                }
            };
            for i in 0..num_segments.max(0) {
                match state.full_get_segment_text_lossy(i) {
                    Ok(text) => transcript.push_str(&text),
                    Err(err) => log_debug(&format!("failed to read whisper segment {i}: {err}")),
                }
            }
            Ok(transcript)
        }
    }

    fn install_whisper_log_silencer() {
        static INSTALL_LOG_CALLBACK: Once = Once::new();
        INSTALL_LOG_CALLBACK.call_once(|| unsafe {
            whisper_rs::set_log_callback(Some(whisper_log_callback), std::ptr::null_mut());
        });
    }

    unsafe extern "C" fn whisper_log_callback(
        _level: c_uint,
        _text: *const c_char,
        _user_data: *mut c_void,
    ) {
    }
}

#[cfg(not(unix))]
mod platform {
    use super::Transcribe;
    use anyhow::{anyhow, Result};

    /// Whisper is only wired up on Unix-like targets.
    pub struct WhisperTranscriber;

    impl WhisperTranscriber {
        pub fn new(_: &str, _: &str) -> Result<Self> {
            Err(anyhow!(
                "Whisper transcription is currently supported only on Unix-like platforms"
            ))
        }
    }

    impl Transcribe for WhisperTranscriber {
        fn transcribe(&self, _: &[f32]) -> Result<String> {
            Err(anyhow!(
                "Whisper transcription is currently supported only on Unix-like platforms"
            ))
        }
    }
}

pub use platform::WhisperTranscriber;
