pub mod error;
pub mod http;
pub mod local;
pub mod store;

pub use error::*;
pub use http::*;
pub use local::*;
pub use store::*;
