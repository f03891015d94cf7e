// Module declarations
pub mod config;
pub mod metadata;
pub mod mount;
pub mod operations;
pub mod path;

// Re-export all types from submodules
pub use config::{ConfigSources, ENV_LOG, ENV_RC, SYSTEM_RC, USER_RC};
pub use metadata::{FileAttr, Timestamp};
pub use mount::{MatchMode, MountEntry, MountTable};
pub use operations::{Identity, OpenFlags};
pub use path::{canonicalize, normalize, Classification};
