pub mod enrollment;
pub mod notifications;
