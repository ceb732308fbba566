//! Collaborators the HTTP layer delegates to: the account backend drives the OAuth
//! handshake, the frontend produces pages and performs social actions.

pub mod mastodon;

use async_trait::async_trait;

use crate::error::AppResult;
use crate::identity::{InstanceRef, RequestContext};
use crate::server::form::{Attachment, TriState};

/// Client application registered on a remote instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppRegistration {
    pub client_id: String,
    pub client_secret: String,
}

#[async_trait]
pub trait AccountBackend: Send + Sync {
    /// Register this client on `domain`.
    async fn register_app(&self, domain: &str) -> AppResult<AppRegistration>;

    /// Where to send the browser to authorize. `state` is echoed back on the callback.
    fn authorization_url(&self, instance: &InstanceRef, state: &str) -> AppResult<String>;

    /// Trade an authorization code for an access token.
    async fn exchange_code(&self, instance: &InstanceRef, code: &str) -> AppResult<String>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Page {
    Root,
    Nav,
    Signin,
    Timeline { kind: String, instance: String, max_id: String, min_id: String },
    Thread { id: String, reply: bool },
    LikedBy { id: String },
    RetweetedBy { id: String },
    Notifications { max_id: String, min_id: String },
    User { id: String, kind: String, max_id: String, min_id: String },
    UserSearch { id: String, q: String, offset: i64 },
    About,
    Emojis,
    Search { q: String, kind: String, offset: i64 },
    Settings,
    Filters,
}

#[derive(Debug, Clone)]
pub struct NewPost {
    pub content: String,
    pub reply_to_id: String,
    pub format: String,
    pub visibility: String,
    pub sensitive: bool,
    pub attachments: Vec<Attachment>,
}

#[derive(Debug, Clone)]
pub enum Action {
    Post(NewPost),
    Like(String),
    Unlike(String),
    Retweet(String),
    Unretweet(String),
    Vote { poll_id: String, choices: Vec<String> },
    Follow { id: String, reblogs: TriState },
    Unfollow(String),
    Accept(String),
    Reject(String),
    Mute(String),
    Unmute(String),
    Block(String),
    Unblock(String),
    Subscribe(String),
    Unsubscribe(String),
    MuteConversation(String),
    UnmuteConversation(String),
    Delete(String),
    ReadNotifications { max_id: String },
    Bookmark(String),
    Unbookmark(String),
    Filter { phrase: String, whole_word: bool },
    Unfilter(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ActionResult {
    Done,
    /// Updated counter after a like or retweet toggle.
    Count(i64),
    /// Id of a newly created status.
    Created(String),
}

#[async_trait]
pub trait Frontend: Send + Sync {
    async fn page(&self, ctx: &RequestContext, page: Page) -> AppResult<String>;
    async fn act(&self, ctx: &RequestContext, action: Action) -> AppResult<ActionResult>;
}
