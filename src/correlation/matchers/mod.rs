pub mod behavioral;
pub mod email;
pub mod phone;
pub mod session;

pub use behavioral::InteractionHistogram;
pub use email::EmailMatcher;
pub use phone::PhoneMatcher;
pub use session::SessionMatcher;
