//! LapCompare Client
//!
//! Client-side job submission and polling for the LapCompare video analysis
//! control plane. The user picks one or two in-car lap videos; this crate
//! uploads them through presigned storage URLs, starts a remote analysis
//! job, polls it to a terminal state, and hands the finished result manifest
//! to a display collaborator.
//!
//! ## Architecture
//!
//! ```text
//! user input                         Control Plane              Storage
//! ┌──────────────┐                   ┌──────────────┐          ┌──────────┐
//! │ JobInput     │                   │ /sign-upload │          │ PUT      │
//! │ (files +     │──┐                │ /start-job   │          │ <put_url>│
//! │  segments)   │  │                │ /jobs/{id}   │          └──────────┘
//! └──────────────┘  ▼                │ /detect-laps │                ▲
//!            ┌──────────────┐        └──────────────┘                │
//!            │ Job          │               ▲                        │
//!            │ Orchestrator │               │                        │
//!            └──────────────┘        ┌──────────────┐         ┌──────────────┐
//!                   │                │ ControlPlane │◀───────▶│ Upload       │
//!                   │                │ Client       │         │ Sequencer    │
//!                   ▼                └──────────────┘         └──────────────┘
//!            ┌──────────────┐
//!            │ Result       │──▶ session store + navigation signal
//!            │ Handoff      │    (read by the display collaborator)
//!            └──────────────┘
//! ```
//!
//! Everything past the HTTP contract — lap detection, overlay rendering,
//! storage signing — runs on the remote service and is never reimplemented
//! here.

pub mod config;
pub mod detector;
pub mod handoff;
pub mod orchestrator;
pub mod transport;
pub mod uploader;

pub use config::{Config, ConfigError, ControlPlaneConfig, DetectConfig, PollConfig};
pub use detector::{DetectedSegments, SegmentDetector};
pub use handoff::{HandoffError, ResultHandoff, SessionStore, MANIFEST_KEY};
pub use orchestrator::{JobError, JobInput, JobOrchestrator, JobPhase};
pub use transport::{
    Artifact, ControlPlane, ControlPlaneClient, DetectedLap, JobHandle, JobRequest, JobState,
    JobStatus, Manifest, SignedUpload, TimeRange, TransportError, UploadTarget,
};
pub use uploader::{UploadSequencer, VideoFile};
