use std::io;
use std::path::PathBuf;

#[derive(thiserror::Error, Debug)]
pub enum CaptionError {
    #[error("candle error: {0}")]
    Candle(candle_core::Error),

    #[error("image error: {0}")]
    Image(image::ImageError),

    #[error("io error: {0}")]
    Io(io::Error),

    #[error("tokenizer error: {0}")]
    Tokenizer(String),

    #[error("hub error: {0}")]
    Hub(hf_hub::api::sync::ApiError),

    #[error("walk error: {0}")]
    Walk(walkdir::Error),

    #[error("{0} is not a directory")]
    NotADirectory(PathBuf),

    #[error("unknown device {0:?} (expected auto, cpu, cuda, metal or an ordinal)")]
    InvalidDevice(String),

    #[error("model produced an empty caption")]
    EmptyCaption,

    #[error("Error: {0}")]
    Msg(String),
}

impl From<candle_core::Error> for CaptionError {
    fn from(value: candle_core::Error) -> Self {
        CaptionError::Candle(value)
    }
}

impl From<image::ImageError> for CaptionError {
    fn from(value: image::ImageError) -> Self {
        CaptionError::Image(value)
    }
}

impl From<io::Error> for CaptionError {
    fn from(value: io::Error) -> Self {
        CaptionError::Io(value)
    }
}

impl From<hf_hub::api::sync::ApiError> for CaptionError {
    fn from(value: hf_hub::api::sync::ApiError) -> Self {
        CaptionError::Hub(value)
    }
}

impl From<walkdir::Error> for CaptionError {
    fn from(value: walkdir::Error) -> Self {
        CaptionError::Walk(value)
    }
}

impl From<tempfile::PersistError> for CaptionError {
    fn from(value: tempfile::PersistError) -> Self {
        CaptionError::Io(value.error)
    }
}

pub type Result<T> = std::result::Result<T, CaptionError>;
