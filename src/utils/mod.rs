pub mod microbit_board;
pub mod rtt_logger;
pub mod uart_bridge;
