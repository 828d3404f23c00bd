//! Pipeline stages for turning a website into per-segment analyses.
//!
//! Each submodule implements exactly one transformation step, so each can
//! be tested on its own and the browser or model backends can be swapped
//! without touching the other stages.
//!
//! ## Data Flow
//!
//! ```text
//! capture ──▶ segment ──▶ encode ──▶ llm ──▶ postprocess
//!  (Chrome)   (slices)   (base64)   (VLM)    (cleanup)
//! ```
//!
//! 1. [`capture`] — full-page screenshot of a URL; the browser runs on a
//!    blocking thread
//! 2. [`segment`] — slice the tall image into overlapping segments and drop
//!    dead space; CPU-bound, run in `spawn_blocking`
//! 3. [`encode`]  — PNG-encode and base64-wrap each crop for the multimodal
//!    request body
//! 4. [`llm`]     — gated model calls with retry/backoff; the only stage with
//!    model I/O
//! 5. [`postprocess`] — deterministic cleanup of model answers

pub mod capture;
pub mod encode;
pub mod llm;
pub mod postprocess;
pub mod segment;
