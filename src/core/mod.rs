mod amount;
mod error;
mod request;
mod response;
mod sign;
mod state;

pub use amount::*;
pub use error::*;
pub use request::*;
pub use response::*;
pub use sign::*;
pub use state::*;
