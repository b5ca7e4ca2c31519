//! Service layer separating I/O concerns from pipeline state

pub mod io;

pub use io::ImageIOService;
