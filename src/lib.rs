//! chronpipe - historical newspaper acquisition, OCR, and enrichment
//! pipeline, built around the Library of Congress's Chronicling America
//! archive.

pub mod archive;
pub mod cli;
pub mod config;
pub mod connector;
pub mod error;
pub mod models;
pub mod ocr;
pub mod pipeline;
pub mod repository;
pub mod schema;
pub mod schema_main;
pub mod search;
