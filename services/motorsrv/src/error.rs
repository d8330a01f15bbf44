use rig_modbus::LinkError;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, MotorSrvError>;

#[derive(Error, Debug)]
pub enum MotorSrvError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Link error: {0}")]
    Link(#[from] LinkError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl MotorSrvError {
    pub fn config(msg: impl Into<String>) -> Self {
        MotorSrvError::Config(msg.into())
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        MotorSrvError::Internal(msg.into())
    }
}

impl From<figment::Error> for MotorSrvError {
    fn from(err: figment::Error) -> Self {
        MotorSrvError::Config(err.to_string())
    }
}
