//! Drivers for the external parts of the stimulator board.
//!
//! - [`mcp4000`]: MCP4xxx SPI digital potentiometer used as the stimulus gain stage

pub mod mcp4000;
