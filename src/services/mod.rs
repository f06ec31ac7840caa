pub mod announcement_service;
pub mod chat_service;
pub mod geo;
pub mod identity_service;
pub mod location_service;
pub mod presence_import_service;
pub mod presence_publisher;
pub mod presence_session;
pub mod presence_store;
pub mod relationship_service;
pub mod visibility_service;
