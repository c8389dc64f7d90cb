pub mod handlers;
pub mod models;
pub mod router;
pub mod services;

pub use models::{Appointment, AppointmentStatus, BookingKind, PaymentStatus, RescheduleRequest};
pub use services::access::AccessGuardService;
pub use services::lifecycle::AppointmentLifecycleService;
pub use services::reminders::ReminderScheduler;
pub use services::reschedule::RescheduleService;
pub use services::window::{resolve_window, WindowCheck, WindowDenial};
