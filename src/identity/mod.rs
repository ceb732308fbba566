//! Session lifecycle, CSRF protection and the authentication gate.
//! Keep the public surface thin and split implementation across sub-modules.

mod csrf;
mod gate;
mod request_context;
mod session;
mod store;

pub use csrf::{CsrfGuard, CSRF_FORM_FIELD};
pub use gate::{authenticate, AuthLevel, Credentials};
pub use request_context::RequestContext;
pub use session::{InstanceRef, Session, SessionError, SessionManager, SessionState, Settings, SESSION_VALIDITY_DAYS};
pub use store::{FileSessionStore, MemorySessionStore, SessionStore, StoreError, StoreResult};
