pub mod chain;
pub mod diff;
pub mod openapi;
pub mod path_rewrite;
pub mod transform;

pub use chain::*;
pub use diff::*;
pub use openapi::*;
pub use path_rewrite::*;
pub use transform::*;
