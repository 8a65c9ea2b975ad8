//! Tool execution: contract, registry, security and output governance

pub mod governor;
pub mod implementations;
pub mod registry;
pub mod security;
pub mod synthetic;

pub use governor::OutputGovernor;
pub use registry::{
    parse_params, ErrorCode, Provenance, Tool, ToolContext, ToolRegistry, ToolResult,
};
pub use security::CredentialVault;
