//! Photo Pair Service
//!
//! Keeps pairs of image URLs (an original photo and its generated
//! counterpart) in PostgreSQL, proxies prompts to an OpenAI-compatible image
//! generation API, and exposes a diagnostic S3 connectivity probe.
//!
//! ## Architecture
//!
//! ```text
//!                      ┌──────────────┐
//!   HTTP clients ─────▶│ API (axum)   │
//!                      └──────────────┘
//!                        │    │     │
//!          ┌─────────────┘    │     └──────────────┐
//!          ▼                  ▼                    ▼
//! ┌──────────────┐   ┌──────────────┐     ┌──────────────┐
//! │ Photo        │   │ Image        │     │ Storage      │
//! │ Store        │   │ Generator    │     │ Probe        │
//! └──────────────┘   └──────────────┘     └──────────────┘
//!          │                  │                    │
//!          ▼                  ▼                    ▼
//!     PostgreSQL        images API            S3 buckets
//! ```
//!
//! `POST /generate-image` writes a row only after the upstream call has
//! returned an image URL.

pub mod api;
pub mod config;
pub mod error;
pub mod image_generator;
pub mod photo_store;
pub mod storage_probe;

pub use api::{create_router, start_api_server, AppState};
pub use config::Config;
pub use error::AppError;
pub use image_generator::{GenerationError, ImageGenerator, OpenAiImageGenerator};
pub use photo_store::{PhotoRecord, PhotoRepository, PhotoStore, StoreError};
pub use storage_probe::{ProbeError, S3StorageProbe, StorageProbe};
