//! vidx Pipeline - Job orchestration for video indexing
//!
//! A submitted video becomes a job in the status store. Workers claim pending
//! jobs and run them through validation, frame extraction, visual analysis,
//! audio processing and indexing, reporting stage-weighted progress as they
//! go. Cancellation is cooperative: checked between stages and batch rounds.
//!
//! Author: hephaex@gmail.com

pub mod cancel;
pub mod orchestrator;
pub mod progress;
pub mod runner;
pub mod services;
pub mod thumbnails;

pub use cancel::CancelRegistry;
pub use orchestrator::{CancelOutcome, DeleteReport, Orchestrator};
pub use progress::{ProgressTracker, Stage};
pub use runner::{JobReport, JobRunner, RunnerSettings};
pub use services::{create_job_store, Services};
pub use thumbnails::{purge_thumbnails, thumbnail_name};
