//! CLI command handlers

pub mod commands;

pub use commands::{
    convert, create, csv_to_array, file_to_array, to_array, update, CreateDocument, EngineOptions,
};
