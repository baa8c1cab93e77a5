use thiserror::Error;

/// Any object store operation that did not complete.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("download of {key} failed: {message}")]
    Download { key: String, message: String },

    #[error("upload of {key} failed: {message}")]
    Upload { key: String, message: String },

    #[error("listing of {prefix} failed: {message}")]
    List { prefix: String, message: String },

    #[error("delete of {key} failed: {message}")]
    Delete { key: String, message: String },
}

impl StoreError {
    pub fn download(key: impl Into<String>, message: impl ToString) -> Self {
        Self::Download {
            key: key.into(),
            message: message.to_string(),
        }
    }

    pub fn upload(key: impl Into<String>, message: impl ToString) -> Self {
        Self::Upload {
            key: key.into(),
            message: message.to_string(),
        }
    }

    pub fn list(prefix: impl Into<String>, message: impl ToString) -> Self {
        Self::List {
            prefix: prefix.into(),
            message: message.to_string(),
        }
    }

    pub fn delete(key: impl Into<String>, message: impl ToString) -> Self {
        Self::Delete {
            key: key.into(),
            message: message.to_string(),
        }
    }
}
