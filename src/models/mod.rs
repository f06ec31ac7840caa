pub mod announcements;
pub mod chats;
pub mod presence;
pub mod relationships;

pub use announcements::{Announcement, AnnouncementRow, Audience, CirkleRow, FeedItem};
pub use chats::{ChatRow, MessageRow};
pub use presence::{
    PresenceLocation, PresencePatch, PresenceRow, UserPresence, Visibility, VisibilityError,
    VisiblePeer,
};
pub use relationships::{RelState, RelationshipRow};
