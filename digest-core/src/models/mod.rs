pub mod digest;
pub mod email;

pub use digest::{ThematicDigest, ThematicSection, ThemeEntities, ThemeSourceEmail};
pub use email::DigestEmail;
