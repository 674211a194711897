//! # Tarkib Support
//!
//! Shared utilities for the Tarkib IoC framework.
//!
//! This crate provides:
//! - Text rendering for human-friendly error messages
//! - "Did you mean?" suggestion scoring for unknown component names

pub mod rendering;
