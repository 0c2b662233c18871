pub mod conversations;
pub mod realtime;
