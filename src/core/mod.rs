//! Core data model: hosts, steps, actions, results and the collaborators
//! that resolve them.

pub mod action;
pub mod directory;
pub mod host;
pub mod paths;
pub mod result;
pub mod step;
pub mod types;
