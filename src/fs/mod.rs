//! Filesystem module.
//!
//! Provides:
//! - Work directory layout and default data directories
//! - Filename generation for units and artifacts

pub mod naming;
pub mod paths;

pub use naming::{artifact_file_name, sanitize_filename, title_to_stem, unit_file_name};
pub use paths::{ensure_dir, job_dir, remove_dir_if_exists, units_dir};
