// ABOUTME: Validated domain types shared by configuration and orchestration.
// ABOUTME: Stack and table identifiers plus template locations.

mod stack_name;
mod table_name;
mod template;

pub use stack_name::{StackName, StackNameError};
pub use table_name::{TableName, TableNameError};
pub use template::TemplateLocation;
