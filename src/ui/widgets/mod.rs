// src/ui/widgets/mod.rs

pub mod footer;
pub mod input;
pub mod report_view;
pub mod summary;
