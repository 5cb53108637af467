//! Tools: trait, registry, role catalog, and built-ins.

pub mod builtins;
pub mod catalog;
pub mod registry;
pub mod traits;

pub use builtins::register_builtins;
pub use catalog::{PLATFORM_TOOLS, role_tools};
pub use registry::ToolRegistry;
pub use traits::{BoxedTool, Tool, ToolContext};
