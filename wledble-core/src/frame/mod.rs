//! # Frame pipeline
//!
//! ```text
//! WledPacket ──► PixelBuffer ──► FrameScheduler ──► StillImageEncoder ──► payload
//!                 (apply)        (rate + change)     (PNG + envelope)
//! ```
//!
//! | Module      | Purpose                                        |
//! |-------------|------------------------------------------------|
//! | `types`     | `Rgb` and `ScreenSize`                         |
//! | `buffer`    | Square RGB grid updated by WLED packets        |
//! | `scheduler` | Rate limit, change detection, FPS accounting   |
//! | `encoder`   | PNG still image + device command envelope      |

pub mod buffer;
pub mod encoder;
pub mod scheduler;
pub mod types;

pub use buffer::PixelBuffer;
pub use encoder::{EncodedFrame, ImageUploadEnvelope, PayloadEnvelope, StillImageEncoder};
pub use scheduler::{FpsMeter, FrameDecision, FrameScheduler, FrameSnapshot, RateLimit};
pub use types::{Rgb, ScreenSize};
