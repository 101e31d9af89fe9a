pub mod builders;
pub mod class;
pub mod init;
pub mod instance;
pub mod serialize;
pub mod value;

pub use self::{builders::*, class::*, init::*, instance::*, serialize::*, value::*};
