//! Audio capture unit: recording lifecycle state machine.
//!
//! The unit owns the path from microphone acquisition to a finished
//! `RecordingClip`. It is modeled as an explicit state machine with a
//! transition table rather than ad hoc boolean flags, because upstream
//! callers race explicit stop calls against automatic duration timeouts.
//!
//! At most one clip exists at a time. A max-duration timeout routes
//! through the same stop path as an explicit stop, so the clip is always
//! captured, never dropped.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::adapters::{GatewayError, Transcript, TranscriptionGateway};

/// Errors surfaced by the capture unit
#[derive(Debug, Error)]
pub enum CaptureError {
    #[error("Microphone permission denied")]
    PermissionDenied,

    #[error("No audio input device available")]
    DeviceUnavailable,

    #[error("A finished clip is pending; discard it before recording again")]
    ClipPending,

    #[error("Operation '{operation}' is not valid while {state}")]
    InvalidState {
        operation: &'static str,
        state: &'static str,
    },

    #[error("Transcription failed: {0}")]
    Transcription(#[source] GatewayError),
}

/// Why a recording stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// Explicit stop or cancel from the caller
    Manual,

    /// The configured duration cap was reached
    MaxDuration,

    /// A new recording was started while one was in progress
    ForcedReset,
}

impl StopReason {
    /// Compact label used in logs
    pub fn label(&self) -> &'static str {
        match self {
            StopReason::Manual => "manual",
            StopReason::MaxDuration => "max_duration",
            StopReason::ForcedReset => "forced_reset",
        }
    }
}

/// A finished recording, held only between stop and
/// transcription/discard. Never journaled or persisted.
#[derive(Debug, Clone)]
pub struct RecordingClip {
    /// Raw encoded audio bytes
    pub audio: Vec<u8>,

    /// Encoding label sent to the transcription gateway
    pub mime_type: String,

    /// Capture duration, capped at the configured maximum
    pub duration: Duration,

    /// When the recording stopped
    pub captured_at: DateTime<Utc>,

    /// Why the recording stopped
    pub stop_reason: StopReason,
}

/// Host-supplied microphone access.
///
/// The engine never touches audio hardware itself; the host UI layer
/// implements this port and reports OS-level acquisition failures.
#[async_trait]
pub trait MicrophonePort: Send + Sync {
    /// Acquire the input device. Fails with `PermissionDenied` or
    /// `DeviceUnavailable`.
    async fn acquire(&self) -> Result<(), CaptureError>;

    /// Release the input device. Must tolerate being called when not
    /// acquired.
    fn release(&self);
}

/// A microphone port that always succeeds, for tests and scripted runs
pub struct NullMicrophone;

#[async_trait]
impl MicrophonePort for NullMicrophone {
    async fn acquire(&self) -> Result<(), CaptureError> {
        Ok(())
    }

    fn release(&self) {}
}

/// Capture configuration
#[derive(Debug, Clone)]
pub struct CaptureConfig {
    /// Hard cap on recording length; reaching it stops the recording
    pub max_duration: Duration,

    /// Encoding label attached to finished clips
    pub mime_type: String,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            max_duration: Duration::from_secs(120),
            mime_type: "audio/m4a".to_string(),
        }
    }
}

/// Observable stage of the capture unit
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptureStage {
    Idle,
    Recording,
    Ready,
    Processing,
    Error,
}

/// Internal state with per-stage data
enum CaptureState {
    Idle,
    Recording {
        started_at: Instant,
        buffer: Vec<u8>,
    },
    Ready {
        clip: RecordingClip,
    },
    /// Marker while a transcription call is in flight; the clip is held by
    /// the in-flight call and lands in `Error` if it fails
    Processing,
    Error {
        clip: RecordingClip,
        error: String,
    },
}

impl CaptureState {
    fn label(&self) -> &'static str {
        match self {
            CaptureState::Idle => "idle",
            CaptureState::Recording { .. } => "recording",
            CaptureState::Ready { .. } => "ready",
            CaptureState::Processing => "processing",
            CaptureState::Error { .. } => "error",
        }
    }
}

/// Result of `start_recording`
#[derive(Debug)]
pub struct StartOutcome {
    /// Partial clip thrown away by a forced reset, surfaced so the caller
    /// can tell the user what was discarded
    pub discarded: Option<RecordingClip>,
}

/// The audio capture unit
pub struct AudioCaptureUnit {
    microphone: Box<dyn MicrophonePort>,
    config: CaptureConfig,
    state: CaptureState,
}

impl AudioCaptureUnit {
    /// Create an idle capture unit
    pub fn new(microphone: Box<dyn MicrophonePort>, config: CaptureConfig) -> Self {
        Self {
            microphone,
            config,
            state: CaptureState::Idle,
        }
    }

    /// Observable stage for callers and assertions
    pub fn stage(&self) -> CaptureStage {
        match self.state {
            CaptureState::Idle => CaptureStage::Idle,
            CaptureState::Recording { .. } => CaptureStage::Recording,
            CaptureState::Ready { .. } => CaptureStage::Ready,
            CaptureState::Processing => CaptureStage::Processing,
            CaptureState::Error { .. } => CaptureStage::Error,
        }
    }

    /// Start a new recording.
    ///
    /// From `Idle` this acquires the microphone and begins buffering. If a
    /// recording is already in progress the unit forces a stop-and-reset
    /// through the normal stop path first and surfaces the discarded
    /// partial clip in the outcome. A finished clip (`Ready`/`Error`)
    /// must be discarded explicitly before a new recording may start.
    pub async fn start_recording(&mut self) -> Result<StartOutcome, CaptureError> {
        let discarded = match self.stage() {
            CaptureStage::Idle => None,
            CaptureStage::Recording => {
                // Interleaved start/stop: reset to idle via the stop path
                // so the partial clip is assembled and surfaced, not
                // silently dropped.
                let clip = self.finish_recording(StopReason::ForcedReset);
                warn!(
                    duration_ms = clip.duration.as_millis() as u64,
                    "Forced reset: discarding in-progress recording"
                );
                Some(clip)
            }
            CaptureStage::Ready | CaptureStage::Processing | CaptureStage::Error => {
                return Err(CaptureError::ClipPending);
            }
        };

        self.microphone.acquire().await?;

        self.state = CaptureState::Recording {
            started_at: Instant::now(),
            buffer: Vec::new(),
        };
        debug!("Recording started");

        Ok(StartOutcome { discarded })
    }

    /// Append buffered audio while recording
    pub fn push_chunk(&mut self, bytes: &[u8]) -> Result<(), CaptureError> {
        match &mut self.state {
            CaptureState::Recording { buffer, .. } => {
                buffer.extend_from_slice(bytes);
                Ok(())
            }
            other => Err(CaptureError::InvalidState {
                operation: "push_chunk",
                state: other.label(),
            }),
        }
    }

    /// Duration check; call once per timer tick while recording.
    ///
    /// Reaching the configured cap stops the recording through the same
    /// path as an explicit stop and reports the reason.
    pub fn tick(&mut self) -> Option<StopReason> {
        let timed_out = match &self.state {
            CaptureState::Recording { started_at, .. } => {
                started_at.elapsed() >= self.config.max_duration
            }
            _ => false,
        };

        if timed_out {
            let clip = self.finish_recording(StopReason::MaxDuration);
            info!(
                duration_ms = clip.duration.as_millis() as u64,
                "Recording stopped at duration cap"
            );
            self.state = CaptureState::Ready { clip };
            Some(StopReason::MaxDuration)
        } else {
            None
        }
    }

    /// Stop the current recording and assemble the clip.
    ///
    /// Valid from `Recording`; from any other state this is a tolerated
    /// no-op returning `None`, because callers race with automatic
    /// timeouts.
    pub fn stop_recording(&mut self) -> Option<&RecordingClip> {
        if !matches!(self.state, CaptureState::Recording { .. }) {
            debug!(state = self.state.label(), "stop_recording ignored");
            return None;
        }

        let clip = self.finish_recording(StopReason::Manual);
        info!(
            duration_ms = clip.duration.as_millis() as u64,
            bytes = clip.audio.len(),
            "Recording stopped"
        );
        self.state = CaptureState::Ready { clip };

        match &self.state {
            CaptureState::Ready { clip } => Some(clip),
            _ => None,
        }
    }

    /// Discard the current clip (or cancel an in-progress recording) and
    /// return to `Idle`. The dropped clip is returned so the caller can
    /// surface the discard.
    pub fn discard(&mut self) -> Option<RecordingClip> {
        match std::mem::replace(&mut self.state, CaptureState::Idle) {
            CaptureState::Recording { started_at, buffer } => {
                // Cancellation routes through the same assembly as a stop.
                self.state = CaptureState::Recording { started_at, buffer };
                let clip = self.finish_recording(StopReason::Manual);
                Some(clip)
            }
            CaptureState::Ready { clip } => Some(clip),
            CaptureState::Error { clip, .. } => Some(clip),
            CaptureState::Idle | CaptureState::Processing => None,
        }
    }

    /// Send the finished clip to the transcription gateway.
    ///
    /// Valid from `Ready`, and from `Error` to retry a failed attempt
    /// without re-recording. On success the clip is discarded and the unit
    /// returns to `Idle`; on failure the unit enters `Error` with the clip
    /// retained.
    pub async fn submit_for_transcription(
        &mut self,
        gateway: &dyn TranscriptionGateway,
    ) -> Result<Transcript, CaptureError> {
        let clip = match std::mem::replace(&mut self.state, CaptureState::Processing) {
            CaptureState::Ready { clip } => clip,
            CaptureState::Error { clip, .. } => clip,
            other => {
                let state = other.label();
                self.state = other;
                return Err(CaptureError::InvalidState {
                    operation: "submit_for_transcription",
                    state,
                });
            }
        };

        match gateway.transcribe(&clip).await {
            Ok(transcript) => {
                info!(
                    confidence = transcript.confidence,
                    chars = transcript.text.len(),
                    "Clip transcribed"
                );
                self.state = CaptureState::Idle;
                Ok(transcript)
            }
            Err(e) => {
                warn!(error = %e, "Transcription failed; clip retained for retry");
                self.state = CaptureState::Error {
                    clip,
                    error: e.to_string(),
                };
                Err(CaptureError::Transcription(e))
            }
        }
    }

    /// Last transcription error, if the unit is in the error state
    pub fn last_error(&self) -> Option<&str> {
        match &self.state {
            CaptureState::Error { error, .. } => Some(error),
            _ => None,
        }
    }

    /// Assemble the buffered audio into a clip and release the microphone.
    ///
    /// All stop paths (explicit stop, duration cap, forced reset, cancel)
    /// converge here. Leaves the unit in `Idle`; the caller decides where
    /// the clip goes.
    fn finish_recording(&mut self, reason: StopReason) -> RecordingClip {
        let (started_at, buffer) = match std::mem::replace(&mut self.state, CaptureState::Idle) {
            CaptureState::Recording { started_at, buffer } => (started_at, buffer),
            other => {
                // Callers only invoke this from Recording; restore and
                // return an empty clip rather than panic.
                self.state = other;
                (Instant::now(), Vec::new())
            }
        };

        self.microphone.release();

        // Duration is capped, never extended.
        let duration = started_at.elapsed().min(self.config.max_duration);

        RecordingClip {
            audio: buffer,
            mime_type: self.config.mime_type.clone(),
            duration,
            captured_at: Utc::now(),
            stop_reason: reason,
        }
    }
}
