//! Pipeline stages for contract-note extraction.
//!
//! Each submodule implements exactly one step. Keeping stages separate makes
//! each independently testable and lets tests swap the model service for a
//! scripted fake without touching the others.
//!
//! ## Data Flow
//!
//! ```text
//! input ──▶ reduce ──▶ gateway ──▶ recover ──▶ validate
//! (path)   (pdfium)   (upload +    (fences,    (fields,
//!                      chat)       repair)     ISIN, numbers)
//! ```
//!
//! 1. [`input`]   : read the PDF and check its magic bytes
//! 2. [`reduce`]  : keep the first and last two pages of oversized files;
//!    runs in `spawn_blocking` because pdfium is not async-safe
//! 3. [`gateway`] : [`gateway::ModelService`] seam, request profiles and the
//!    empty-answer fallback ladder; [`openai`] is the HTTP implementation
//! 4. [`recover`] : turn raw model text into a JSON object
//! 5. [`validate`]: accumulate rule violations and coerce amounts

pub mod gateway;
pub mod input;
pub mod openai;
pub mod recover;
pub mod reduce;
pub mod validate;
