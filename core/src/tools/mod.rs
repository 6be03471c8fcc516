pub mod descriptor;
pub mod error;
pub mod function;
pub mod native;
pub mod registry;
pub mod traits;

// Re-export common types
pub use descriptor::{load_descriptors, FunctionDescriptor};
pub use error::{ToolError, ToolResult};
pub use function::FnTool;
pub use registry::ToolRegistry;
pub use traits::{Tool, ToolParam};
