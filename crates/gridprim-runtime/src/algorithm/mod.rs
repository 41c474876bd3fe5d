mod base;
mod callback;

pub use base::*;
pub use callback::*;
