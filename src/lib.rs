//! patchway — a self-patching launcher.
//!
//! Turns a stock upstream artifact plus a bundled binary delta into the
//! customized artifact locally, caches it by content fingerprint, and
//! hands execution off to it.

pub mod cache;
pub mod digest;
pub mod dispatch;
pub mod error;
pub mod extensions;
pub mod handoff;
pub mod launcher;
pub mod manifest;
pub mod patch;
pub mod source;
