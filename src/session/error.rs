use thiserror::Error;

use super::SessionState;
use crate::freq::SelectError;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum SessionError {
    #[error("The session has finished")]
    Finished,

    #[error("Can only continue from a paused session, but the session is {0}")]
    NotPaused(SessionState),

    #[error(transparent)]
    Select(#[from] SelectError),
}
