use std::path::{Component, Path};

use crate::error::ReceiverError;

/// Validates that a sender-supplied name is a plain file name.
///
/// The name is joined onto the output directory, so it must not be able
/// to point anywhere else.
///
/// Rejects:
/// - Empty names and names containing NUL
/// - Path separators (`/` or `\`)
/// - `.` and `..`
/// - Anything the platform parses as more than one plain component, such
///   as a Windows drive prefix (`C:name`)
pub fn validate_file_name(name: &str) -> Result<(), ReceiverError> {
    if name.is_empty() {
        return Err(ReceiverError::InvalidName("empty name".into()));
    }

    if name.contains('\0') {
        return Err(ReceiverError::InvalidName(format!(
            "NUL byte not allowed: {name:?}"
        )));
    }

    if name.contains('/') || name.contains('\\') {
        return Err(ReceiverError::InvalidName(format!(
            "path separators not allowed: {name}"
        )));
    }

    let mut components = Path::new(name).components();
    match (components.next(), components.next()) {
        (Some(Component::Normal(_)), None) => Ok(()),
        (Some(Component::Prefix(_)), _) => Err(ReceiverError::InvalidName(format!(
            "drive prefix not allowed: {name}"
        ))),
        _ => Err(ReceiverError::InvalidName(format!(
            "not a plain file name: {name}"
        ))),
    }
}
