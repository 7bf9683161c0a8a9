//! # wledble-gateway — WLED to BLE display service
//!
//! Listens for WLED realtime UDP pixel streams and forwards them as
//! still images to an iDotMatrix-style BLE LED matrix.
//!
//! ## Modes
//!
//! - **Run**: Forward frames until Ctrl-C (default).
//! - **Scan**: List nearby displays and exit (`--scan`).
//! - **Dry run**: Forward into an in-memory link, no hardware needed
//!   (`--dry-run`).

pub mod config;
pub mod service;
