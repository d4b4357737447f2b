mod error;
mod group;
mod guard;
mod level;
mod organization;
mod profiles;
mod provision;
mod store;
mod timeperiod;
mod trophy;
mod user;
mod workflow;

#[cfg(test)]
mod mock;

pub use error::*;
pub use group::*;
pub use guard::*;
pub use level::*;
pub use organization::*;
pub use profiles::*;
pub use provision::*;
pub use store::*;
pub use timeperiod::*;
pub use trophy::*;
pub use user::*;
pub use workflow::*;

pub type GithubHandle = String;
