pub mod assignment;
pub mod domain;
#[cfg(test)]
pub(crate) mod fixtures;
pub mod input;
pub mod layout;
pub mod macros;
pub mod validation;

pub use assignment::*;
pub use domain::*;
pub use input::*;
pub use layout::*;
pub use validation::*;
