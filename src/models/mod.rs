mod parsed;
mod product;
mod purchase;
mod source;
mod status;
mod verify;

pub use parsed::*;
pub use product::*;
pub use purchase::*;
pub use source::*;
pub use status::*;
pub use verify::*;
