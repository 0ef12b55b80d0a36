mod category;
mod comment;
mod movie;
mod slug;
mod user;

pub use category::*;
pub use comment::*;
pub use movie::*;
pub use slug::*;
pub use user::*;
