pub mod checkpoint;
pub mod clock;
pub mod driver;
pub mod light_client;
pub mod sync_committee;

pub use checkpoint::*;
pub use clock::*;
pub use driver::*;
pub use light_client::*;
pub use sync_committee::*;
