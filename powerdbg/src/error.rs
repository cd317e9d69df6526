use crate::architecture::power::PowerError;
use crate::bus::BusError;
use crate::sbefifo::SbefifoError;
use crate::target::TargetError;
use powerdbg_target::DescriptionError;
use thiserror::Error;

/// The overarching error type of powerdbg.
#[derive(Error, Debug)]
pub enum Error {
    /// An error on the debug bus.
    #[error("An error occurred while accessing the debug bus")]
    Bus(#[from] BusError),
    /// An error while injecting instructions into a POWER thread.
    #[error("An error occurred while accessing POWER registers")]
    Power(#[from] PowerError),
    /// The target tree could not satisfy the request.
    #[error(transparent)]
    Target(#[from] TargetError),
    /// The SBEFIFO command channel reported an error.
    #[error("An error occurred on the SBEFIFO command channel")]
    Sbefifo(#[from] SbefifoError),
    /// The topology description is invalid.
    #[error("The topology description is invalid")]
    Description(#[from] DescriptionError),
    /// Any other error.
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}
