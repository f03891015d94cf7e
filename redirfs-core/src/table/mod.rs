//! Process-wide tables of backend-bound descriptors and directory streams.

mod dirs;
mod files;

pub use dirs::{DirectoryRecord, DirectoryTable};
pub use files::{DescriptorTable, FileState, OpenFile, Position};
