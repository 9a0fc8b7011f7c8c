pub mod error;
pub mod routes;
pub mod serve;
pub mod sqlite;

pub use error::*;
pub use routes::*;
pub use serve::*;
pub use sqlite::*;
