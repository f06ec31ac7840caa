pub mod announcements;
pub mod chats;
pub mod health;
pub mod presence;
pub mod relationships;
