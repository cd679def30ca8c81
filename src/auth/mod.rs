pub mod guard;
pub mod session;
pub mod store;

pub use guard::TokenGuard;
pub use session::AuthSession;
pub use store::AuthStore;
