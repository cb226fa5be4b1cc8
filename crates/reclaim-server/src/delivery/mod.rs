pub mod credentials;
pub mod meta;
pub mod smtp;

pub use credentials::FileCredentialProvider;
pub use meta::MetaCapiTransport;
pub use smtp::SmtpMailer;
