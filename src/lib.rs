//! Beacon Voice - local voice front end for the Beacon gateway
//!
//! Listens continuously for a wake phrase, records an utterance, transcribes
//! it, forwards the text to the gateway and speaks the reply.
//!
//! # Architecture
//!
//! ```text
//! ┌───────────────┐   frames   ┌──────────────┐  while Idle
//! │  Microphone   │──────────▶│  FrameQueue  │────────────▶ WakeDetector
//! │ (cpal thread) │ drop-oldest└──────┬───────┘
//! └───────────────┘                   │ while Capturing
//!                                     ▼
//!                          EndpointingRecorder ──▶ Utterance (WAV)
//!                                                        │
//! ┌──────────────────────── TurnController ──────────────▼──────────────┐
//! │  Transcriber (STT) ──▶ Backend (gateway) ──▶ Synthesizer (TTS)       │
//! └──────────────────────────────────────────────────────┬───────────────┘
//!                                                        ▼
//!                                                  PlaybackSink
//! ```

pub mod audio;
pub mod config;
pub mod endpoint;
pub mod error;
pub mod services;
pub mod shutdown;
pub mod turn;
pub mod vad;
pub mod wake;

pub use config::Config;
pub use error::{Error, Result};
pub use turn::{TurnController, TurnEvent, TurnOutcome, TurnState};
