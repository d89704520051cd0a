//! Testing utilities and harness for Arbor

pub mod fixtures;
pub mod testing;

pub use fixtures::*;
pub use testing::*;

pub mod prelude {
    pub use crate::fixtures::*;
    pub use crate::testing::*;
}
