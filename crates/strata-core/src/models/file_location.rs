use std::fmt::{Display, Formatter, Result as FmtResult};

use serde::{Deserialize, Serialize};

use crate::AppError;

/// A file inside a named backend container (bucket, managed endpoint, filesystem root).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FileLocation {
    pub file_container_id: String,
    pub file_id: String,
}

impl FileLocation {
    pub fn new(file_container_id: impl Into<String>, file_id: impl Into<String>) -> Self {
        Self {
            file_container_id: file_container_id.into(),
            file_id: file_id.into(),
        }
    }

    pub fn is_valid(&self) -> bool {
        !self.file_container_id.trim().is_empty() && !self.file_id.trim().is_empty()
    }

    pub fn validate(&self) -> Result<(), AppError> {
        if self.is_valid() {
            Ok(())
        } else {
            Err(AppError::InvalidRequest(format!(
                "Invalid file location: {}",
                self
            )))
        }
    }

    /// Last path component of the file id.
    pub fn base_name(&self) -> &str {
        base_name(&self.file_id)
    }

    /// A location in the same container with `name` appended to this file id.
    pub fn child(&self, name: &str) -> FileLocation {
        FileLocation {
            file_container_id: self.file_container_id.clone(),
            file_id: format!("{}/{}", self.file_id.trim_end_matches('/'), name),
        }
    }
}

impl Display for FileLocation {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        write!(f, "{}:{}", self.file_container_id, self.file_id)
    }
}

/// Last component of a slash separated path (`"/a/b/c.dat"` -> `"c.dat"`).
pub fn base_name(path: &str) -> &str {
    path.trim_end_matches('/')
        .rsplit('/')
        .next()
        .unwrap_or(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_file_location_validity() {
        assert!(FileLocation::new("bucket", "a/b").is_valid());
        assert!(!FileLocation::new("", "a/b").is_valid());
        assert!(!FileLocation::new("bucket", "  ").is_valid());
        assert!(matches!(
            FileLocation::new("bucket", "").validate(),
            Err(AppError::InvalidRequest(_))
        ));
    }

    #[test]
    fn test_base_name_and_child() {
        let loc = FileLocation::new("ep", "/data/run1/");
        assert_eq!(loc.base_name(), "run1");
        assert_eq!(loc.child("x.dat").file_id, "/data/run1/x.dat");
        assert_eq!(base_name("/ProjA/Set1/file.h5"), "file.h5");
        assert_eq!(base_name("file.h5"), "file.h5");
    }
}
