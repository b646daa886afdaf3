use std::path::PathBuf;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum FrameWriteError {
    #[error("Couldn't create frame directory '{dir}': {err}")]
    CreateDir { dir: PathBuf, err: std::io::Error },

    #[error("Error from the plotters library: {0}")]
    Draw(String),
}
