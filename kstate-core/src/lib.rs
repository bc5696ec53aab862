mod id;
mod name;
mod permissions;
mod unique;

pub use id::IdAllocator;
pub use name::{canonical_name, max_name_len, user_name, validate_name};
pub use permissions::Permissions;
pub use unique::unique_name;
