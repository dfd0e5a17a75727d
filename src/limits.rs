/// Reservations checked per booking transition.
pub const MAX_RESERVATIONS_PER_BOOKING: usize = 64;
/// Buffer before/after a service, in minutes. Also how far outside a
/// candidate slot the conflict check looks for neighbours.
pub const MAX_BUFFER_MINUTES: i64 = 24 * 60;
pub const MAX_STATUS_NAME_LEN: usize = 64;
/// Longer audit messages are truncated.
pub const MAX_LOG_MESSAGE_LEN: usize = 1024;
/// Upper bound for the pending-payment window, in minutes (30 days).
pub const MAX_PENDING_PAYMENT_MINUTES: i64 = 30 * 24 * 60;
