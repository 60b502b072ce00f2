pub mod atsapi;
#[cfg(feature = "atsapi")]
pub mod ats9462;
pub mod board;
pub mod capture;
pub mod config;
pub mod digitizer_params;
pub mod dma;
pub mod engine;
pub mod sim;
pub mod tui;
pub mod utils;
pub mod writer;

#[cfg(feature = "atsapi")]
pub use ats9462::*;
pub use board::*;
pub use capture::*;
pub use config::*;
pub use digitizer_params::*;
pub use dma::*;
pub use engine::*;
pub use sim::*;
pub use tui::*;
pub use utils::*;
pub use writer::*;
