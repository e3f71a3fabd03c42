//! Stampo: an HTTP service that fills DOCX templates.
//!
//! A single `POST /fill` endpoint accepts a base64-encoded template and a JSON
//! data mapping, substitutes placeholders, loops, and images through
//! `stampo-engine`, and returns the finished document as base64.

pub mod application;
pub mod config;
pub mod infra;
