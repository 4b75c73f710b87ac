//! Command implementations for the Sagedet CLI.

pub mod assets;
pub mod checkpoints;
pub mod doctor;
pub mod image;
pub mod init;
pub mod job;
pub mod logs;
pub mod role;
