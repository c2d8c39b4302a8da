mod attendance;
mod audit;
mod batch;
mod certificate;
mod note;
mod registration;
mod staff;
mod template;

pub use attendance::*;
pub use audit::*;
pub use batch::*;
pub use certificate::*;
pub use note::*;
pub use registration::*;
pub use staff::*;
pub use template::*;
