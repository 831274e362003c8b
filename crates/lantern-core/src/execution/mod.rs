pub mod account;
pub mod erc20;
pub mod proof;
pub mod throttle;

pub use account::*;
pub use erc20::*;
pub use proof::*;
pub use throttle::*;
