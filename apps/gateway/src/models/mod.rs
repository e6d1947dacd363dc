pub mod channel;
pub mod channel_override;
pub mod role;
pub mod user;
