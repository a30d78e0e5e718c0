//! Per-entry pipeline stages.
//!
//! Each submodule implements exactly one step of turning a manifest entry into
//! caption-image pairs. Stages share no state; the orchestrator in
//! [`crate::harvest`] threads one entry through them and drops everything
//! before moving on.
//!
//! ## Data Flow
//!
//! ```text
//! fetch ──▶ oa-package ──▶ caption/jats ──▶ matcher ──▶ normalize
//! (HTTP)    (tar.gz scan)   (NXML → figs)    (ref → member) (→ RGB JPEG)
//! ```
//!
//! 1. [`fetch`]   : stream the package from the primary or fallback endpoint
//!    into the entry's temp directory, with an optional size guard
//! 2. `oa_package`: list members and keep bytes for markup and images only;
//!    runs in `spawn_blocking`
//! 3. [`caption`] : the parser boundary; [`jats`] is the stock NXML adapter
//! 4. [`matcher`] : resolve each figure's graphic reference to one member
//! 5. [`normalize`]: decode, flatten to RGB, re-encode as JPEG, write
//!    atomically into the image tree

pub mod caption;
pub mod fetch;
pub mod jats;
pub mod matcher;
pub mod normalize;
