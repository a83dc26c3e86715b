pub mod events;
pub mod fingerprint;
pub mod generation;
pub mod guard;
pub mod jobs;
pub mod model;
pub mod validation;
