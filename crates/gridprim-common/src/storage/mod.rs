mod base;
mod memory;

pub use base::*;
pub use memory::*;

#[cfg(std_io)]
mod file;
#[cfg(std_io)]
pub use file::*;
