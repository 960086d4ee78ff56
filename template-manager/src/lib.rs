pub mod fingerprint_base;
pub mod template;
