mod cache;
mod key;
mod parameters;
mod policy;
mod tuner;
mod util;

pub use cache::*;
pub use key::*;
pub use parameters::*;
pub use policy::*;
pub use tuner::*;
pub use util::*;
