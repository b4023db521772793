pub mod player;
pub mod prediction;
pub mod request;

pub use player::*;
pub use prediction::*;
pub use request::*;
