pub mod blueprint;
pub mod crop;
pub mod cultivation;
pub mod farm;
pub mod interaction;
pub mod plan;
pub mod progress;
pub mod task;
pub mod weather;

pub use blueprint::*;
pub use crop::*;
pub use cultivation::*;
pub use farm::*;
pub use interaction::*;
pub use plan::*;
pub use progress::*;
pub use task::*;
pub use weather::*;
