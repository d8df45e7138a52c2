pub mod artifacts;
pub mod pipeline;
pub mod subsystems;
