//! Built-in processors

mod digest;

pub use digest::DigestFilename;
