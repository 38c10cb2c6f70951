use std::path::PathBuf;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("no weights configured for {model_key}/{dataset_key}: {missing} does not exist")]
    UnknownWeightKey {
        model_key: String,
        dataset_key: String,
        missing: String,
    },

    #[error("{what} does not exist: {}", path.display())]
    MissingFile { what: &'static str, path: PathBuf },

    #[error("no files in directory: {pattern}")]
    EmptyDataset { pattern: String },

    #[error("{0}")]
    Unsupported(String),

    #[error("camera error: {0}")]
    Camera(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Image(#[from] image::ImageError),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Ml(#[from] anyhow::Error),

    #[cfg(feature = "camera")]
    #[error(transparent)]
    OpenCv(#[from] opencv::Error),
}

impl Error {
    /// The message followed by every underlying cause.
    pub fn report(&self) -> String {
        let mut message = self.to_string();
        let mut source = std::error::Error::source(self);
        while let Some(cause) = source {
            message.push_str(": ");
            message.push_str(&cause.to_string());
            source = cause.source();
        }
        message
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn report_includes_causes() {
        let cause = std::io::Error::other("truncated pickle");
        let err = Error::Ml(anyhow::Error::new(cause).context("failed to read model.pth"));
        assert_eq!(err.to_string(), "failed to read model.pth");
        assert_eq!(err.report(), "failed to read model.pth: truncated pickle");
    }

    #[test]
    fn report_of_plain_error() {
        let err = Error::EmptyDataset {
            pattern: "city/leftImg8bit/val/*/*.png".to_string(),
        };
        assert_eq!(
            err.report(),
            "no files in directory: city/leftImg8bit/val/*/*.png"
        );
    }
}
