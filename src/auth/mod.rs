pub mod issuer;
pub mod manager;
pub mod store;
pub mod token;

pub use issuer::{TokenIssuer, VendorIssuer};
pub use manager::{TokenManager, TokenSettings, TokenStatus};
pub use store::{FileTokenStore, MemoryTokenStore, TokenStore};
pub use token::Token;
