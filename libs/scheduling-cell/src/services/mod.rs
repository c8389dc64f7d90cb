pub mod access;
pub mod collaborators;
pub mod conflict;
pub mod lifecycle;
pub mod reminders;
pub mod reschedule;
pub mod window;
