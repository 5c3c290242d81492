pub mod extract;
pub mod status;
pub mod validate;

pub const MANIFEST_DIR: &str = "manifests";
pub const EXTRACT_MANIFEST_PREFIX: &str = "extract_run_";
