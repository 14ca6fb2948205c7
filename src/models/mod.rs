pub mod catalog;
pub mod modules;
pub mod request;
pub mod response;

pub use catalog::*;
pub use modules::*;
pub use request::*;
pub use response::*;
