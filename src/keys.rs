use crate::config::ResizeConfig;

/// Suffix inserted before the extension of a derived output key
pub const RESIZED_SUFFIX: &str = "_resized";

/// Suffix appended to an output key to form its lock key
pub const LOCK_SUFFIX: &str = ".processing_lock";

/// Decide whether a notification key should be processed at all.
///
/// Rejects empty keys, keys under the configured output prefix, keys that
/// are themselves derived outputs, and keys whose extension is not in the
/// allow-list (case-insensitive).
pub fn is_eligible(key: &str, config: &ResizeConfig) -> bool {
    if key.is_empty() {
        return false;
    }

    // Outputs must not trigger reprocessing loops
    if !config.output_prefix.is_empty() && key.starts_with(&config.output_prefix) {
        return false;
    }
    let (stem, ext) = split_extension(file_name(key));
    if stem.ends_with(RESIZED_SUFFIX) {
        return false;
    }

    config
        .allowed_extensions
        .iter()
        .any(|allowed| allowed.eq_ignore_ascii_case(ext))
}

/// Derive the canonical output key for an input key.
///
/// Strips the directory, inserts the resized suffix before the extension,
/// and re-prefixes with the configured output prefix. Pure and total:
/// deriving twice from the same input always yields the same key.
pub fn derive_output_key(input_key: &str, config: &ResizeConfig) -> String {
    let (stem, ext) = split_extension(file_name(input_key));
    format!("{}{}{}{}", config.output_prefix, stem, RESIZED_SUFFIX, ext)
}

/// Derive the lock key guarding an output key
pub fn derive_lock_key(output_key: &str) -> String {
    format!("{output_key}{LOCK_SUFFIX}")
}

/// Final path component of a key
fn file_name(key: &str) -> &str {
    key.rsplit('/').next().unwrap_or(key)
}

/// Split a file name into (stem, extension-with-dot); no dot yields an
/// empty extension
fn split_extension(name: &str) -> (&str, &str) {
    match name.rfind('.') {
        Some(idx) if idx > 0 => name.split_at(idx),
        _ => (name, ""),
    }
}
